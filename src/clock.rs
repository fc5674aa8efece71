use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::types::SimMinute;

/// Source of simulated time (§4.1). `now()` reports the current simulated
/// minute; `wait_until` blocks the caller (real-time mode only) until that
/// minute arrives or the clock is cancelled.
pub trait Clock: Send {
    fn now(&self) -> SimMinute;
    fn advance_to(&mut self, minute: SimMinute);
    /// Blocks until `minute` in real time, scaled by `speed_factor`.
    /// Returns early (without error) if `cancel` fires. A no-op in fast mode.
    fn wait_until(&self, minute: SimMinute, cancel: &Receiver<()>);
    fn speed_factor(&self) -> f64;
}

/// Advances instantly to whatever minute is requested — used for batch runs
/// and tests, where wall-clock time has no bearing on the simulation.
#[derive(Debug, Default)]
pub struct FastClock {
    current: SimMinute,
}

impl FastClock {
    pub fn new() -> Self {
        FastClock { current: 0.0 }
    }
}

impl Clock for FastClock {
    fn now(&self) -> SimMinute {
        self.current
    }

    fn advance_to(&mut self, minute: SimMinute) {
        debug_assert!(minute >= self.current, "clock must not move backwards");
        self.current = minute;
    }

    fn wait_until(&self, _minute: SimMinute, _cancel: &Receiver<()>) {}

    fn speed_factor(&self) -> f64 {
        f64::INFINITY
    }
}

/// Paces the run against wall-clock time: one simulated minute equals
/// `1 / speed_factor` real seconds. `wait_until` sleeps in short slices so a
/// shutdown signalled mid-wait is observed promptly instead of after a long
/// single sleep.
pub struct RealTimeClock {
    current: SimMinute,
    speed_factor: f64,
}

impl RealTimeClock {
    pub fn new(speed_factor: f64) -> Self {
        assert!(speed_factor > 0.0, "speed_factor must be positive");
        RealTimeClock { current: 0.0, speed_factor }
    }

    fn real_seconds_for(&self, sim_minutes: f64) -> f64 {
        (sim_minutes * 60.0) / self.speed_factor
    }
}

impl Clock for RealTimeClock {
    fn now(&self) -> SimMinute {
        self.current
    }

    fn advance_to(&mut self, minute: SimMinute) {
        debug_assert!(minute >= self.current, "clock must not move backwards");
        self.current = minute;
    }

    fn wait_until(&self, minute: SimMinute, cancel: &Receiver<()>) {
        let remaining_minutes = minute - self.current;
        if remaining_minutes <= 0.0 {
            return;
        }
        let total_secs = self.real_seconds_for(remaining_minutes);
        let slice = Duration::from_millis(50);
        let mut elapsed = Duration::ZERO;
        let total = Duration::from_secs_f64(total_secs.max(0.0));
        loop {
            if elapsed >= total {
                return;
            }
            let remaining = total - elapsed;
            let this_wait = remaining.min(slice);
            match cancel.recv_timeout(this_wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => elapsed += this_wait,
            }
        }
    }

    fn speed_factor(&self) -> f64 {
        self.speed_factor
    }
}

/// Broadcast-by-closing cancellation (§9 "coroutine control flow... maps to
/// OS threads + channels"). Cloning shares the same flag and channel; any
/// clone firing stops every waiter.
#[derive(Clone)]
pub struct ShutdownToken {
    flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    notify_rx: Receiver<()>,
    notify_tx: crossbeam_channel::Sender<()>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = crossbeam_channel::bounded(0);
        ShutdownToken {
            flag: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            notify_rx,
            notify_tx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Signals cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
        // Best-effort wake of a single blocked waiter; waiters re-check
        // `is_cancelled` in their poll loop so a dropped send is harmless.
        let _ = self.notify_tx.try_send(());
    }

    pub fn receiver(&self) -> &Receiver<()> {
        &self.notify_rx
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_clock_advances_instantly() {
        let mut clock = FastClock::new();
        clock.advance_to(1440.0);
        assert_eq!(clock.now(), 1440.0);
    }

    #[test]
    fn fast_clock_wait_until_never_blocks() {
        let clock = FastClock::new();
        let (_tx, rx) = crossbeam_channel::bounded(0);
        // Would hang forever under a real sleep; must return immediately.
        clock.wait_until(999_999.0, &rx);
    }

    #[test]
    fn shutdown_token_reports_cancellation() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn real_time_clock_wait_is_cancellable() {
        let clock = RealTimeClock::new(1.0);
        let token = ShutdownToken::new();
        let rx = token.receiver().clone();
        let t = std::thread::spawn(move || {
            token.cancel();
        });
        let start = std::time::Instant::now();
        // Without cancellation this would wait ~60 real seconds.
        clock.wait_until(60.0, &rx);
        t.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
