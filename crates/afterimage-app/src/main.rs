mod app;
mod cli;
mod composition;
mod effect;
mod gpu;
mod media;
mod params;
mod settings;
mod shader;

use std::sync::Arc;

use anyhow::Result;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use app::App;
use cli::CliOptions;
use settings::SettingsConfig;

struct AfterimageApp {
    app: Option<App>,
    settings: Option<SettingsConfig>,
    cli: CliOptions,
}

impl AfterimageApp {
    fn new(settings: SettingsConfig, cli: CliOptions) -> Self {
        Self {
            app: None,
            settings: Some(settings),
            cli,
        }
    }
}

fn center_on_monitor(event_loop: &ActiveEventLoop, window: &Window) {
    if let Some(monitor) = event_loop
        .primary_monitor()
        .or_else(|| event_loop.available_monitors().next())
    {
        let monitor_size = monitor.size();
        let window_size = window.outer_size();
        let monitor_pos = monitor.position();
        let x = (monitor_size.width.saturating_sub(window_size.width)) / 2;
        let y = (monitor_size.height.saturating_sub(window_size.height)) / 2;
        window.set_outer_position(winit::dpi::PhysicalPosition::new(
            monitor_pos.x + x as i32,
            monitor_pos.y + y as i32,
        ));
    }
}

impl ApplicationHandler for AfterimageApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }
        let Some(settings) = self.settings.take() else {
            return;
        };

        let attrs = WindowAttributes::default()
            .with_title("Afterimage")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };
        center_on_monitor(event_loop, &window);

        match App::new(window, settings, &self.cli) {
            Ok(app) => {
                app.window.request_redraw();
                self.app = Some(app);
                log::info!("Afterimage initialized");
            }
            Err(e) => {
                log::error!("Failed to initialize app: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(app) = self.app.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                app.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                app.resize(size.width, size.height);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match key {
                KeyCode::Escape => {
                    app.shutdown();
                    event_loop.exit();
                }
                KeyCode::KeyF => {
                    let window = &app.window;
                    if window.fullscreen().is_some() {
                        window.set_fullscreen(None);
                    } else {
                        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                    }
                }
                KeyCode::KeyL => app.cycle_loop_mode(),
                KeyCode::KeyS => app.quick_save(),
                KeyCode::BracketLeft => app.lower_top_layer(),
                KeyCode::Backspace => app.pop_top_effect(),
                _ => {}
            },
            WindowEvent::RedrawRequested => {
                app.update();

                match app.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let w = app.gpu.surface_config.width;
                        let h = app.gpu.surface_config.height;
                        app.resize(w, h);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Out of GPU memory");
                        app.shutdown();
                        event_loop.exit();
                        return;
                    }
                    Err(e) => {
                        log::warn!("Surface error: {e}");
                    }
                }

                app.window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = CliOptions::parse(std::env::args().skip(1))?;
    if cli.help {
        print!("{}", cli::USAGE);
        return Ok(());
    }
    let settings = SettingsConfig::load();

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut app = AfterimageApp::new(settings, cli);
    event_loop.run_app(&mut app)?;

    Ok(())
}
