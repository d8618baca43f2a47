//! Repeating drain task.
//!
//! Runs [`EncoderDrainLoop::run_cycle`] on a dedicated `cast-drain` thread,
//! sleeping a fixed [`DRAIN_INTERVAL`] after every cycle whether or not the
//! cycle found any buffers.  There is only ever one thread per task, so two
//! cycles never overlap.
//!
//! The loop ends when [`DrainTask::stop`] clears the running flag or when a
//! cycle returns a fatal [`crate::application::drain_encoder::DrainError`];
//! in the latter case the drain loop has already torn the pipeline down and
//! no further cycle is scheduled.

use std::io;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::EncoderOutput;
use crate::application::drain_encoder::EncoderDrainLoop;

/// Delay between the end of one drain cycle and the start of the next.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

struct ActiveRun {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owner of the background drain thread.
pub struct DrainTask {
    interval: Duration,
    cycles: Arc<AtomicU64>,
    run: Mutex<Option<ActiveRun>>,
}

impl DrainTask {
    /// Creates a stopped task using [`DRAIN_INTERVAL`].
    pub fn new() -> Self {
        Self::with_interval(DRAIN_INTERVAL)
    }

    /// Creates a stopped task with a custom cycle interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            cycles: Arc::new(AtomicU64::new(0)),
            run: Mutex::new(None),
        }
    }

    /// Starts draining with `drain`.
    ///
    /// A run that is already in progress is stopped first, so at most one
    /// drain thread exists per task.  The cycle counter restarts at zero.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the drain thread cannot be spawned.
    pub fn start<E>(&self, mut drain: EncoderDrainLoop<E>) -> io::Result<()>
    where
        E: EncoderOutput + 'static,
    {
        self.stop();

        let running = Arc::new(AtomicBool::new(true));
        let cycles = Arc::clone(&self.cycles);
        cycles.store(0, Ordering::Relaxed);
        let interval = self.interval;
        let thread_running = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("cast-drain".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::Relaxed) {
                    let result = drain.run_cycle();
                    cycles.fetch_add(1, Ordering::Relaxed);
                    match result {
                        Ok(report) if report.forwarded + report.dropped > 0 => {
                            debug!(
                                "drain cycle: {} forwarded, {} dropped",
                                report.forwarded, report.dropped
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("drain task halted: {e}");
                            thread_running.store(false, Ordering::Relaxed);
                            break;
                        }
                    }
                    std::thread::sleep(interval);
                }
                debug!("drain thread exiting");
            })?;

        *self.run.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveRun { running, handle });
        info!("drain task started ({:?} interval)", self.interval);
        Ok(())
    }

    /// Stops the current run, if any, and waits for its thread to exit.
    ///
    /// Must not be called from the drain thread itself.
    pub fn stop(&self) {
        let run = self.run.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(run) = run {
            run.running.store(false, Ordering::Relaxed);
            if run.handle.join().is_err() {
                warn!("drain thread panicked");
            }
            info!("drain task stopped");
        }
    }

    /// Returns `true` while a drain thread is running.
    pub fn is_running(&self) -> bool {
        self.run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|run| run.running.load(Ordering::Relaxed))
    }

    /// Number of cycles completed by the current (or last) run.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

impl Default for DrainTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DrainTask {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
