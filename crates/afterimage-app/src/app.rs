use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use winit::window::Window;

use crate::cli::{CliOptions, StartupAction};
use crate::composition::{Composition, EngineServices, persist};
use crate::effect::FrameContext;
use crate::gpu::GpuContext;
use crate::gpu::compositor::CompositePipelines;
use crate::gpu::placeholder::FallbackTexture;
use crate::gpu::present::PresentPass;
use crate::media::webcam_manager::WebcamConstraints;
use crate::settings::SettingsConfig;
use crate::shader::ShaderWatcher;

const QUICK_SAVE_SET: &str = "quicksave";

pub struct App {
    pub gpu: GpuContext,
    pub window: Arc<Window>,
    pub settings: SettingsConfig,
    pub services: EngineServices,
    pub composition: Composition,
    pub pipelines: Arc<CompositePipelines>,
    pub fallback: FallbackTexture,
    pub present: PresentPass,
    pub shader_watcher: Option<ShaderWatcher>,
    pub start_time: Instant,
    pub last_frame: Instant,
    pub frame_count: u64,
    pub delta_time: f32,
    pub bpm: f32,
}

impl App {
    pub fn new(window: Arc<Window>, settings: SettingsConfig, cli: &CliOptions) -> Result<Self> {
        let gpu = GpuContext::new(window.clone())?;
        let hdr_format = GpuContext::hdr_format();

        let pipelines = CompositePipelines::new(&gpu.device, hdr_format);
        let composition = Composition::new(
            &gpu.device,
            hdr_format,
            pipelines.clone(),
            gpu.canvas(),
            settings.playback(),
        );
        let fallback = FallbackTexture::new(&gpu.device, &gpu.queue, hdr_format);
        let present = PresentPass::new(&gpu.device, gpu.format);
        let services = EngineServices::new(&settings);
        log::info!("{} effects registered", services.effects.len());

        let shader_watcher = match ShaderWatcher::new() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                log::warn!("Shader hot reload disabled: {e}");
                None
            }
        };

        let now = Instant::now();
        let mut app = Self {
            gpu,
            window,
            bpm: cli.bpm.unwrap_or(settings.bpm),
            settings,
            services,
            composition,
            pipelines,
            fallback,
            present,
            shader_watcher,
            start_time: now,
            last_frame: now,
            frame_count: 0,
            delta_time: 0.0,
        };
        app.apply_cli(cli);
        Ok(app)
    }

    /// Load `--set`, then build layers from the remaining actions in order.
    fn apply_cli(&mut self, cli: &CliOptions) {
        let now = Instant::now();
        let canvas = self.gpu.canvas();

        if let Some(set) = &cli.set {
            match persist::load_set(set) {
                Ok(state) => self.composition.apply_state(
                    &state,
                    &self.gpu.device,
                    &self.gpu.queue,
                    canvas,
                    &mut self.services,
                    now,
                ),
                Err(e) => log::error!("Failed to load set '{set}': {e:#}"),
            }
        }

        let mut last_layer = self.composition.layers().last().map(|l| l.id);
        for action in &cli.actions {
            match action {
                StartupAction::Media(path) => {
                    last_layer = Some(self.composition.add_media_layer(
                        &self.gpu.device,
                        &self.gpu.queue,
                        canvas,
                        path.clone(),
                        &mut self.services,
                        now,
                    ));
                }
                StartupAction::Webcam(device_id) => {
                    let constraints = WebcamConstraints {
                        device_id: device_id.clone(),
                        ..Default::default()
                    };
                    last_layer = Some(self.composition.add_webcam_layer(
                        &self.gpu.device,
                        canvas,
                        constraints,
                        &mut self.services,
                        now,
                    ));
                }
                StartupAction::Effect(key) => {
                    let layer_id = match last_layer {
                        Some(id) => id,
                        None => {
                            let id = self.composition.add_layer(&self.gpu.device, canvas, key);
                            last_layer = Some(id);
                            id
                        }
                    };
                    self.composition.add_effect(
                        layer_id,
                        key,
                        &self.services,
                        &self.gpu.device,
                        canvas,
                    );
                }
                StartupAction::Loop(mode) => {
                    match last_layer.and_then(|id| self.composition.layer_mut(id)) {
                        Some(layer) => layer.set_loop_mode(*mode),
                        None => log::warn!("--loop {} given before any layer", mode.as_str()),
                    }
                }
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        // Targets follow the canvas lazily on the next render
        self.gpu.resize(width, height);
    }

    pub fn update(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame).as_secs_f64();
        self.last_frame = now;
        self.delta_time = dt as f32;

        self.services.tick(&self.gpu.queue, now);
        self.composition.update(dt, now);

        if let Some(watcher) = &self.shader_watcher {
            let changes = watcher.drain_changes();
            if !changes.is_empty() {
                for path in &changes {
                    log::info!("Shader changed: {}", path.display());
                }
                let reloaded = self.composition.reload_shaders(&self.gpu.device, &changes);
                log::info!("Reloaded {reloaded} effect(s)");
            }
        }
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.gpu.surface.get_current_texture()?;
        let surface_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("afterimage-encoder"),
            });

        let ctx = FrameContext {
            device: &self.gpu.device,
            queue: &self.gpu.queue,
            canvas: self.gpu.canvas(),
            time: self.last_frame.duration_since(self.start_time).as_secs_f32(),
            delta_time: self.delta_time,
            bpm: self.bpm,
            frame_index: self.frame_count,
            fallback: &self.fallback,
            pipelines: &self.pipelines,
            capture_scale: self.settings.capture_scale,
        };
        let frame = self
            .composition
            .render_frame(&ctx, &mut encoder, &mut self.services);

        self.present
            .render(&self.gpu.device, &mut encoder, &frame, &surface_view);

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        self.frame_count = self.frame_count.wrapping_add(1);
        Ok(())
    }

    /// Cycle the loop mode of the topmost media layer.
    pub fn cycle_loop_mode(&mut self) {
        let Some(id) = self
            .composition
            .layers()
            .iter()
            .rev()
            .find(|l| l.media().is_some())
            .map(|l| l.id)
        else {
            return;
        };
        if let Some(layer) = self.composition.layer_mut(id) {
            let mode = layer.loop_mode().next();
            layer.set_loop_mode(mode);
            log::info!("Layer {id} loop mode: {}", mode.as_str());
        }
    }

    /// Move the topmost layer one slot down the stack.
    pub fn lower_top_layer(&mut self) {
        let count = self.composition.layers().len();
        if count < 2 {
            return;
        }
        if let Some(id) = self.composition.layers().last().map(|l| l.id) {
            self.composition.move_layer(id, count - 2);
            log::info!("Layer {id} moved down");
        }
    }

    /// Drop the last effect of the topmost layer.
    pub fn pop_top_effect(&mut self) {
        let Some((layer_id, effect_id)) = self
            .composition
            .layers()
            .last()
            .and_then(|l| l.effects.last().map(|e| (l.id, e.id)))
        else {
            return;
        };
        if self.composition.remove_effect(layer_id, effect_id) {
            log::info!("Removed effect {effect_id} from layer {layer_id}");
        }
    }

    pub fn quick_save(&self) {
        let state = self.composition.to_state();
        if let Err(e) = persist::save_set(QUICK_SAVE_SET, &state) {
            log::error!("Failed to save set: {e:#}");
        }
    }

    /// Release sources before the window goes away.
    pub fn shutdown(&mut self) {
        let now = Instant::now();
        self.composition.clear(&mut self.services, now);
        self.services.webcams.shutdown();
    }
}
