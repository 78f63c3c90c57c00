//! Loop-mode emulation on a forward-only playback medium.
//!
//! The medium can only play forward, pause and seek. Looping is a seek to 0;
//! reverse and ping-pong are emulated by pausing and stepping the position
//! backwards at a fixed rate, then resuming forward play from 0. The pending
//! step deadline lives inside [`PlaybackState`], so there is never more than
//! one, and dropping or re-moding the controller cancels it.

use std::time::{Duration, Instant};

use super::types::{LoopMode, MediaError};

/// Forward-only transport the controller drives.
pub trait PlaybackMedium {
    /// Position in seconds.
    fn current_time(&self) -> f64;
    /// Total length in seconds; `None` until known or for stills.
    fn duration(&self) -> Option<f64>;
    fn seek(&mut self, secs: f64);
    fn play(&mut self) -> Result<(), MediaError>;
    fn pause(&mut self);
    fn is_playing(&self) -> bool;
    /// Stopped because the end was reached.
    fn has_ended(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    /// Distance from the end (seconds) that counts as "at the end".
    pub end_epsilon: f64,
    /// Backward steps per second while reversing.
    pub reverse_step_rate: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            end_epsilon: 0.05,
            reverse_step_rate: 30.0,
        }
    }
}

impl PlaybackConfig {
    fn step_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.reverse_step_rate.max(1.0))
    }

    fn step_size(&self) -> f64 {
        1.0 / self.reverse_step_rate.max(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Forward,
    ReversingStep { next_step: Instant },
}

/// Per-layer loop-mode state machine.
#[derive(Debug, Clone)]
pub struct PlaybackLoopController {
    mode: LoopMode,
    state: PlaybackState,
    config: PlaybackConfig,
}

impl PlaybackLoopController {
    pub fn new(mode: LoopMode, config: PlaybackConfig) -> Self {
        Self {
            mode,
            state: PlaybackState::Forward,
            config,
        }
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn config(&self) -> PlaybackConfig {
        self.config
    }

    #[cfg(test)]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_reversing(&self) -> bool {
        matches!(self.state, PlaybackState::ReversingStep { .. })
    }

    /// Whether a backward step is scheduled.
    #[cfg(test)]
    pub fn has_pending_timer(&self) -> bool {
        self.is_reversing()
    }

    /// Switch modes. A pending step is cancelled and forward play resumes
    /// from wherever the stepping left the medium.
    pub fn set_mode(&mut self, mode: LoopMode, medium: &mut impl PlaybackMedium) {
        if mode == self.mode {
            return;
        }
        log::debug!("Loop mode {} -> {}", self.mode.as_str(), mode.as_str());
        self.mode = mode;
        if self.is_reversing() {
            self.state = PlaybackState::Forward;
            resume(medium);
        }
    }

    /// Drop any pending step without touching the medium.
    pub fn cancel(&mut self) {
        self.state = PlaybackState::Forward;
    }

    /// Advance the state machine. Called once per render tick.
    pub fn update(&mut self, medium: &mut impl PlaybackMedium, now: Instant) {
        match self.state {
            PlaybackState::Forward => self.check_end(medium, now),
            PlaybackState::ReversingStep { next_step } => self.step(medium, now, next_step),
        }
    }

    /// Width of the end and start windows. Capped at half the clip so a clip
    /// shorter than `end_epsilon` still has a forward phase.
    fn edge_window(&self, duration: f64) -> f64 {
        self.config.end_epsilon.min(duration * 0.5)
    }

    fn check_end(&mut self, medium: &mut impl PlaybackMedium, now: Instant) {
        let Some(duration) = medium.duration().filter(|d| *d > 0.0) else {
            return;
        };
        if !(medium.is_playing() || medium.has_ended()) {
            return;
        }
        if medium.current_time() < duration - self.edge_window(duration) {
            return;
        }

        match self.mode {
            LoopMode::Loop => {
                log::debug!("End of media, looping");
                medium.seek(0.0);
                resume(medium);
            }
            mode if mode.steps_backwards() => {
                log::debug!("End of media, stepping backwards ({})", mode.as_str());
                medium.pause();
                self.state = PlaybackState::ReversingStep {
                    next_step: now + self.config.step_interval(),
                };
            }
            _ => {}
        }
    }

    fn step(&mut self, medium: &mut impl PlaybackMedium, now: Instant, next_step: Instant) {
        if now < next_step {
            return;
        }
        let interval = self.config.step_interval();
        // Catch up on every step that fell due since the last tick
        let overdue = now.duration_since(next_step).as_secs_f64();
        let due_steps = 1 + (overdue / interval.as_secs_f64()).floor() as u32;

        let start_window = medium
            .duration()
            .map_or(self.config.end_epsilon, |d| self.edge_window(d));
        let target = medium.current_time() - self.config.step_size() * f64::from(due_steps);
        if target <= start_window {
            log::debug!("Reverse stepping reached start, resuming forward");
            medium.seek(0.0);
            self.state = PlaybackState::Forward;
            resume(medium);
            return;
        }

        medium.seek(target);
        self.state = PlaybackState::ReversingStep {
            next_step: next_step + interval * due_steps,
        };
    }
}

fn resume(medium: &mut impl PlaybackMedium) {
    if let Err(e) = medium.play() {
        log::error!("Playback failed to resume, leaving paused: {e}");
    }
}

/// Forward-only clock for pre-decoded media. Position advances only while
/// playing and stops (ended) at the duration.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaClock {
    duration: Option<f64>,
    position: f64,
    playing: bool,
    ended: bool,
    pub speed: f64,
}

impl MediaClock {
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration,
            position: 0.0,
            playing: false,
            ended: false,
            speed: 1.0,
        }
    }

    /// Advance by `dt` seconds of wall time.
    pub fn advance(&mut self, dt: f64) {
        if !self.playing {
            return;
        }
        let Some(duration) = self.duration else {
            return;
        };
        self.position += dt * self.speed;
        if self.position >= duration {
            self.position = duration;
            self.playing = false;
            self.ended = true;
        }
    }
}

impl PlaybackMedium for MediaClock {
    fn current_time(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn seek(&mut self, secs: f64) {
        let end = self.duration.unwrap_or(0.0);
        self.position = secs.clamp(0.0, end);
        self.ended = false;
    }

    fn play(&mut self) -> Result<(), MediaError> {
        let Some(duration) = self.duration.filter(|d| *d > 0.0) else {
            return Err(MediaError::NotPlayable("source has no duration".to_string()));
        };
        // Playing from the very end restarts, like a media element does
        if self.position >= duration {
            self.position = 0.0;
        }
        self.playing = true;
        self.ended = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn has_ended(&self) -> bool {
        self.ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    /// Medium that plays forward and can be told to reject `play()`.
    struct MockMedium {
        clock: MediaClock,
        fail_play: bool,
        play_calls: u32,
    }

    impl MockMedium {
        fn playing_at(duration: f64, time: f64) -> Self {
            let mut clock = MediaClock::new(Some(duration));
            clock.play().unwrap();
            clock.seek(time);
            Self {
                clock,
                fail_play: false,
                play_calls: 0,
            }
        }
    }

    impl PlaybackMedium for MockMedium {
        fn current_time(&self) -> f64 {
            self.clock.current_time()
        }
        fn duration(&self) -> Option<f64> {
            self.clock.duration()
        }
        fn seek(&mut self, secs: f64) {
            self.clock.seek(secs);
        }
        fn play(&mut self) -> Result<(), MediaError> {
            self.play_calls += 1;
            if self.fail_play {
                return Err(MediaError::NotPlayable("autoplay blocked".into()));
            }
            self.clock.play()
        }
        fn pause(&mut self) {
            self.clock.pause();
        }
        fn is_playing(&self) -> bool {
            self.clock.is_playing()
        }
        fn has_ended(&self) -> bool {
            self.clock.has_ended()
        }
    }

    fn step() -> Duration {
        PlaybackConfig::default().step_interval()
    }

    /// Tick at the step rate until the controller leaves reverse stepping,
    /// asserting the position strictly decreases on every tick.
    fn run_until_forward(
        ctl: &mut PlaybackLoopController,
        medium: &mut MockMedium,
        mut now: Instant,
    ) -> usize {
        let mut last = medium.current_time();
        let mut ticks = 0;
        while ctl.is_reversing() {
            now += step();
            ctl.update(medium, now);
            ticks += 1;
            if ctl.is_reversing() {
                let t = medium.current_time();
                assert!(t < last, "time must decrease: {t} !< {last}");
                assert!(!medium.is_playing());
                last = t;
            }
            assert!(ticks < 10_000, "reverse stepping never finished");
        }
        ticks
    }

    #[test]
    fn none_mode_stays_stopped() {
        let mut medium = MockMedium::playing_at(5.0, 4.9);
        let mut ctl = PlaybackLoopController::new(LoopMode::None, PlaybackConfig::default());
        let t0 = Instant::now();
        medium.clock.advance(1.0);
        assert!(medium.has_ended());
        for i in 1..10 {
            ctl.update(&mut medium, t0 + step() * i);
        }
        assert!(!medium.is_playing());
        assert!(approx_eq(medium.current_time(), 5.0, 1e-9));
        assert!(!ctl.has_pending_timer());
    }

    #[test]
    fn loop_mode_resets_and_plays() {
        let mut medium = MockMedium::playing_at(5.0, 4.97);
        let mut ctl = PlaybackLoopController::new(LoopMode::Loop, PlaybackConfig::default());
        ctl.update(&mut medium, Instant::now());
        assert!(approx_eq(medium.current_time(), 0.0, 1e-12));
        assert!(medium.is_playing());
        assert!(!ctl.has_pending_timer());
    }

    #[test]
    fn loop_mode_restarts_after_natural_end() {
        let mut medium = MockMedium::playing_at(2.0, 1.5);
        let mut ctl = PlaybackLoopController::new(LoopMode::Loop, PlaybackConfig::default());
        medium.clock.advance(1.0);
        assert!(medium.has_ended());
        ctl.update(&mut medium, Instant::now());
        assert!(medium.is_playing());
        assert!(approx_eq(medium.current_time(), 0.0, 1e-12));
    }

    /// Play a clip shorter than the end window at 120 Hz for one second.
    /// Returns the furthest position reached and the ticks spent playing.
    fn run_short_clip(mode: LoopMode) -> (f64, usize) {
        let mut clock = MediaClock::new(Some(0.04));
        clock.play().unwrap();
        let mut ctl = PlaybackLoopController::new(mode, PlaybackConfig::default());
        let t0 = Instant::now();
        let mut furthest: f64 = 0.0;
        let mut playing_ticks = 0;
        for i in 1..=120u32 {
            clock.advance(1.0 / 120.0);
            furthest = furthest.max(clock.current_time());
            ctl.update(&mut clock, t0 + Duration::from_secs_f64(f64::from(i) / 120.0));
            if clock.is_playing() {
                playing_ticks += 1;
            }
        }
        (furthest, playing_ticks)
    }

    #[test]
    fn short_clip_loops_through_its_frames() {
        let (furthest, playing_ticks) = run_short_clip(LoopMode::Loop);
        assert!(furthest > 0.02, "furthest = {furthest}");
        assert_eq!(playing_ticks, 120);
    }

    #[test]
    fn short_clip_reverse_plays_forward_between_rewinds() {
        for mode in [LoopMode::Reverse, LoopMode::PingPong] {
            let (furthest, playing_ticks) = run_short_clip(mode);
            assert!(furthest > 0.02, "furthest = {furthest}");
            assert!(playing_ticks >= 30, "{} playing ticks = {playing_ticks}", mode.as_str());
        }
    }

    #[test]
    fn short_clip_is_not_at_end_when_started() {
        let mut clock = MediaClock::new(Some(0.04));
        clock.play().unwrap();
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, PlaybackConfig::default());
        ctl.update(&mut clock, Instant::now());
        assert!(!ctl.is_reversing());
        assert!(clock.is_playing());
    }

    #[test]
    fn before_end_window_nothing_happens() {
        for mode in LoopMode::ALL {
            let mut medium = MockMedium::playing_at(10.0, 9.94);
            let mut ctl = PlaybackLoopController::new(*mode, PlaybackConfig::default());
            ctl.update(&mut medium, Instant::now());
            assert!(medium.is_playing());
            assert!(approx_eq(medium.current_time(), 9.94, 1e-12));
            assert!(!ctl.has_pending_timer());
        }
    }

    #[test]
    fn paused_mid_clip_is_not_an_end() {
        let mut medium = MockMedium::playing_at(10.0, 9.99);
        medium.pause();
        let mut ctl = PlaybackLoopController::new(LoopMode::Loop, PlaybackConfig::default());
        ctl.update(&mut medium, Instant::now());
        assert!(!medium.is_playing());
        assert!(approx_eq(medium.current_time(), 9.99, 1e-12));
    }

    #[test]
    fn reverse_steps_down_then_plays_forward() {
        let mut medium = MockMedium::playing_at(3.0, 2.96);
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, PlaybackConfig::default());
        let t0 = Instant::now();
        ctl.update(&mut medium, t0);
        assert!(ctl.is_reversing());
        assert!(!medium.is_playing());

        let ticks = run_until_forward(&mut ctl, &mut medium, t0);
        // ~2.91s of rewind at 1/30s per step
        assert!((80..=95).contains(&ticks), "ticks = {ticks}");
        assert!(approx_eq(medium.current_time(), 0.0, 1e-12));
        assert!(medium.is_playing());
        assert!(!ctl.has_pending_timer());
    }

    #[test]
    fn ping_pong_scenario_ten_seconds() {
        let mut medium = MockMedium::playing_at(10.0, 9.96);
        let mut ctl = PlaybackLoopController::new(LoopMode::PingPong, PlaybackConfig::default());
        let t0 = Instant::now();

        ctl.update(&mut medium, t0);
        assert!(ctl.is_reversing());
        assert!(ctl.has_pending_timer());

        run_until_forward(&mut ctl, &mut medium, t0);
        assert_eq!(medium.current_time(), 0.0);
        assert!(medium.is_playing());
        assert_eq!(ctl.state(), PlaybackState::Forward);
    }

    #[test]
    fn step_not_due_does_nothing() {
        let mut medium = MockMedium::playing_at(10.0, 9.99);
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, PlaybackConfig::default());
        let t0 = Instant::now();
        ctl.update(&mut medium, t0);
        let before = medium.current_time();
        ctl.update(&mut medium, t0 + Duration::from_millis(5));
        assert_eq!(medium.current_time(), before);
    }

    #[test]
    fn slow_ticks_catch_up() {
        let mut medium = MockMedium::playing_at(10.0, 9.99);
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, PlaybackConfig::default());
        let t0 = Instant::now();
        ctl.update(&mut medium, t0);
        // One tick a full second later applies ~30 steps at once
        ctl.update(&mut medium, t0 + step() + Duration::from_secs(1));
        assert!(approx_eq(medium.current_time(), 9.99 - 31.0 / 30.0, 1e-6));
        assert!(ctl.is_reversing());
    }

    #[test]
    fn set_mode_cancels_pending_step() {
        let mut medium = MockMedium::playing_at(10.0, 9.99);
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, PlaybackConfig::default());
        let t0 = Instant::now();
        ctl.update(&mut medium, t0);
        ctl.update(&mut medium, t0 + step());
        assert!(ctl.has_pending_timer());

        ctl.set_mode(LoopMode::None, &mut medium);
        assert!(!ctl.has_pending_timer());
        assert!(medium.is_playing());
        let t = medium.current_time();
        ctl.update(&mut medium, t0 + step() * 5);
        assert_eq!(medium.current_time(), t);
    }

    #[test]
    fn failed_play_leaves_paused_without_retry() {
        let mut medium = MockMedium::playing_at(1.0, 0.97);
        medium.fail_play = true;
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, PlaybackConfig::default());
        let t0 = Instant::now();
        ctl.update(&mut medium, t0);
        run_until_forward(&mut ctl, &mut medium, t0);
        assert_eq!(medium.play_calls, 1);
        assert!(!medium.is_playing());
        assert_eq!(medium.current_time(), 0.0);

        // Paused at 0 is not an end, so nothing retries
        ctl.update(&mut medium, t0 + Duration::from_secs(60));
        assert_eq!(medium.play_calls, 1);
    }

    #[test]
    fn custom_step_rate_and_epsilon() {
        let config = PlaybackConfig {
            end_epsilon: 0.5,
            reverse_step_rate: 2.0,
        };
        let mut medium = MockMedium::playing_at(4.0, 3.6);
        let mut ctl = PlaybackLoopController::new(LoopMode::Reverse, config);
        let t0 = Instant::now();
        ctl.update(&mut medium, t0);
        assert!(ctl.is_reversing());
        ctl.update(&mut medium, t0 + Duration::from_millis(500));
        assert!(approx_eq(medium.current_time(), 3.1, 1e-9));
    }

    #[test]
    fn unknown_duration_never_triggers() {
        let mut clock = MediaClock::new(None);
        let mut ctl = PlaybackLoopController::new(LoopMode::Loop, PlaybackConfig::default());
        assert!(clock.play().is_err());
        ctl.update(&mut clock, Instant::now());
        assert!(!ctl.has_pending_timer());
    }

    #[test]
    fn clock_stops_at_end() {
        let mut clock = MediaClock::new(Some(1.0));
        clock.play().unwrap();
        clock.advance(0.4);
        assert!(approx_eq(clock.current_time(), 0.4, 1e-12));
        clock.advance(5.0);
        assert!(clock.has_ended());
        assert!(!clock.is_playing());
        assert!(approx_eq(clock.current_time(), 1.0, 1e-12));
    }

    #[test]
    fn clock_seek_clears_ended_and_clamps() {
        let mut clock = MediaClock::new(Some(2.0));
        clock.play().unwrap();
        clock.advance(3.0);
        clock.seek(-1.0);
        assert!(!clock.has_ended());
        assert_eq!(clock.current_time(), 0.0);
        clock.seek(9.0);
        assert_eq!(clock.current_time(), 2.0);
    }

    #[test]
    fn clock_paused_does_not_advance() {
        let mut clock = MediaClock::new(Some(2.0));
        clock.advance(1.0);
        assert_eq!(clock.current_time(), 0.0);
    }
}
