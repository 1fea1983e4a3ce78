//! Drift-compensated sampling cadence.
//!
//! Sleeping a fixed interval between ticks makes the period grow by however
//! long each tick takes. Instead the previous iteration's work time is inferred
//! from the wall clock (`elapsed - last_sleep`) and subtracted from the next
//! sleep, so the mean period stays at the configured interval.

use log::debug;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    last_tick: Option<Instant>,
    last_sleep: Duration,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Cadence {
            interval,
            last_tick: None,
            last_sleep: Duration::ZERO,
        }
    }

    /// How long to sleep before the next tick, given the current time.
    ///
    /// The first call returns zero so sampling starts immediately. An
    /// iteration that overran the interval yields zero, never a negative or
    /// accumulated catch-up sleep.
    pub fn next_sleep(&mut self, now: Instant) -> Duration {
        let sleep = match self.last_tick {
            None => Duration::ZERO,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                let work = elapsed.saturating_sub(self.last_sleep);
                self.interval.saturating_sub(work)
            }
        };
        self.last_tick = Some(now);
        self.last_sleep = sleep;
        sleep
    }
}

/// Outcome of an interruptible sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Elapsed,
    Stopped,
}

/// Cooperative stop request shared between the loop and a signal handler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `duration` unless a stop is requested first.
    pub fn sleep(&self, duration: Duration) -> Wake {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (stopped, _) = cvar
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        if *stopped { Wake::Stopped } else { Wake::Elapsed }
    }
}

/// Run `tick` on the cadence until `stop` is triggered; returns the number
/// of ticks performed. A stop never interrupts a tick in progress.
pub fn run_loop<F>(interval: Duration, stop: &StopHandle, mut tick: F) -> u64
where
    F: FnMut(),
{
    let mut cadence = Cadence::new(interval);
    let mut ticks = 0;
    loop {
        let sleep = cadence.next_sleep(Instant::now());
        debug!("Scheduler: sleeping {:.3}s", sleep.as_secs_f64());
        if stop.sleep(sleep) == Wake::Stopped {
            break;
        }
        tick();
        ticks += 1;
    }
    ticks
}
