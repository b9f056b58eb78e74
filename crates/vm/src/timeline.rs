use fxvm_core::Native;
use std::time::Duration;

/// Constant receiving the time since the previous tick, in seconds.
pub const ELAPSED_TIME: &str = "elapsedTime";
/// Constant receiving the time since the timeline started, in seconds.
pub const ELAPSED_TIME_LEVEL: &str = "elapsedTimeLevel";
pub const FRAME_NUMBER: &str = "frameNumber";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineState {
    Stopped,
    Running,
    Paused,
}

/// Playback clock for effects.
///
/// The timeline never reads a clock itself: every transition takes the caller's notion of
/// "now" as a [`Duration`] from an arbitrary origin. Time spent paused is excluded.
#[derive(Clone, Debug)]
pub struct Timeline {
    state: TimelineState,
    origin: Duration,
    paused_at: Duration,
    paused: Duration,
    elapsed: Duration,
    delta: Duration,
    frame: u32,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            state: TimelineState::Stopped,
            origin: Duration::ZERO,
            paused_at: Duration::ZERO,
            paused: Duration::ZERO,
            elapsed: Duration::ZERO,
            delta: Duration::ZERO,
            frame: 0,
        }
    }

    pub fn state(&self) -> TimelineState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == TimelineState::Stopped
    }

    pub fn is_running(&self) -> bool {
        self.state == TimelineState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == TimelineState::Paused
    }

    /// Restart from zero.
    pub fn start(&mut self, now: Duration) {
        *self = Self {
            state: TimelineState::Running,
            origin: now,
            ..Self::new()
        };
    }

    pub fn stop(&mut self) {
        self.state = TimelineState::Stopped;
        self.delta = Duration::ZERO;
    }

    pub fn pause(&mut self, now: Duration) {
        if self.state == TimelineState::Running {
            self.state = TimelineState::Paused;
            self.paused_at = now;
        }
    }

    pub fn unpause(&mut self, now: Duration) {
        if self.state == TimelineState::Paused {
            self.state = TimelineState::Running;
            self.paused += now.saturating_sub(self.paused_at);
        }
    }

    /// Advance to `now`. Returns `false` and leaves the clock alone unless running.
    pub fn tick(&mut self, now: Duration) -> bool {
        if self.state != TimelineState::Running {
            self.delta = Duration::ZERO;
            return false;
        }

        let elapsed = now.saturating_sub(self.origin).saturating_sub(self.paused);
        self.delta = elapsed.saturating_sub(self.elapsed);
        self.elapsed = elapsed;
        self.frame = self.frame.wrapping_add(1);
        true
    }

    /// Time since start, excluding pauses, as of the last tick.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Time between the last two ticks.
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// The uniforms routines read the timeline through.
    pub fn uniforms(&self) -> [(&'static str, Native); 3] {
        [
            (ELAPSED_TIME, Native::Float(self.delta.as_secs_f32())),
            (ELAPSED_TIME_LEVEL, Native::Float(self.elapsed.as_secs_f32())),
            (FRAME_NUMBER, Native::Uint(self.frame)),
        ]
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn ticks_measure_deltas() {
        let mut timeline = Timeline::new();
        assert!(!timeline.tick(ms(10)));

        timeline.start(ms(100));
        assert!(timeline.tick(ms(116)));
        assert!(timeline.tick(ms(150)));
        assert_eq!(timeline.elapsed(), ms(50));
        assert_eq!(timeline.delta(), ms(34));
        assert_eq!(timeline.frame(), 2);
    }

    #[test]
    fn pauses_are_excluded() {
        let mut timeline = Timeline::new();
        timeline.start(ms(0));
        timeline.tick(ms(10));
        timeline.pause(ms(10));
        assert!(!timeline.tick(ms(500)));
        assert_eq!(timeline.delta(), Duration::ZERO);

        timeline.unpause(ms(1000));
        timeline.tick(ms(1020));
        assert_eq!(timeline.elapsed(), ms(30));
        assert_eq!(timeline.delta(), ms(20));
    }

    #[test]
    fn stop_and_restart() {
        let mut timeline = Timeline::new();
        timeline.start(ms(0));
        timeline.tick(ms(40));
        timeline.stop();
        assert!(timeline.is_stopped());

        timeline.start(ms(100));
        assert_eq!(timeline.frame(), 0);
        timeline.tick(ms(110));
        assert_eq!(timeline.elapsed(), ms(10));
    }

    #[test]
    fn uniforms() {
        let mut timeline = Timeline::new();
        timeline.start(ms(0));
        timeline.tick(ms(500));
        assert_eq!(
            timeline.uniforms(),
            [
                (ELAPSED_TIME, Native::Float(0.5)),
                (ELAPSED_TIME_LEVEL, Native::Float(0.5)),
                (FRAME_NUMBER, Native::Uint(1)),
            ]
        );
    }
}
