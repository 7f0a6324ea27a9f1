//! Run-scoped state shared by every worker of a benchmark run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use super::events::{RunEvent, RunEventLog};
use crate::core::Pose2D;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every waypoint of the tour was attempted.
    Completed,
    /// A goal produced no result within the waypoint timeout.
    WaypointTimeout,
    /// The run-wide timeout elapsed.
    RunTimeout,
    /// External interrupt (Ctrl-C).
    Interrupted,
    /// The navigation server could not be reached.
    NavigationUnavailable,
    /// The dispatcher found no waypoint to send.
    EmptyTour,
    /// No tour could be planned.
    PlanningFailed,
}

impl Termination {
    pub fn is_success(&self) -> bool {
        matches!(self, Termination::Completed)
    }
}

/// Run flags, shutdown signal, latest ground truth and event ledger.
///
/// Termination is first-wins: the first caller of [`terminate`] writes its
/// events and signals shutdown; later callers write nothing. Ordinary
/// events go through [`record`], which is refused once the run has
/// terminated, so the terminating events are always the last lines of
/// the ledger.
///
/// [`terminate`]: RunContext::terminate
/// [`record`]: RunContext::record
#[derive(Debug)]
pub struct RunContext {
    run_started: AtomicBool,
    first_scan_received: AtomicBool,
    shutdown: AtomicBool,
    finalizations: AtomicU32,
    termination: Mutex<Option<Termination>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    ground_truth: ArcSwapOption<Pose2D>,
    events: RunEventLog,
}

impl RunContext {
    pub fn new(events: RunEventLog) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Self {
            run_started: AtomicBool::new(false),
            first_scan_received: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            finalizations: AtomicU32::new(0),
            termination: Mutex::new(None),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            ground_truth: ArcSwapOption::empty(),
            events,
        }
    }

    pub fn events(&self) -> &RunEventLog {
        &self.events
    }

    pub fn is_run_started(&self) -> bool {
        self.run_started.load(Ordering::Acquire)
    }

    pub fn set_run_started(&self) {
        self.run_started.store(true, Ordering::Release);
    }

    pub fn is_first_scan_received(&self) -> bool {
        self.first_scan_received.load(Ordering::Acquire)
    }

    pub fn set_first_scan_received(&self) {
        self.first_scan_received.store(true, Ordering::Release);
    }

    /// Replace the latest ground-truth pose.
    pub fn set_ground_truth(&self, pose: Pose2D) {
        self.ground_truth.store(Some(Arc::new(pose)));
    }

    pub fn latest_ground_truth(&self) -> Option<Pose2D> {
        self.ground_truth.load_full().map(|pose| *pose)
    }

    /// Write an event unless the run has already terminated.
    ///
    /// Returns `false` when the event was dropped.
    pub fn record(&self, event: RunEvent) -> bool {
        let termination = self.termination.lock();
        if termination.is_some() {
            return false;
        }
        self.events.write(event);
        true
    }

    /// End the run, writing `events` first.
    ///
    /// Returns `true` for the caller that actually terminated the run.
    pub fn terminate(&self, reason: Termination, events: &[RunEvent]) -> bool {
        let mut termination = self.termination.lock();
        if let Some(existing) = *termination {
            tracing::debug!("Run already terminated ({:?}), ignoring {:?}", existing, reason);
            return false;
        }

        for &event in events {
            self.events.write(event);
        }
        *termination = Some(reason);
        self.shutdown.store(true, Ordering::Release);

        // Dropping the sender wakes every receiver of the shutdown signal
        self.shutdown_tx.lock().take();
        true
    }

    /// Count one write of the buffered tables, returning the new total.
    pub fn mark_finalized(&self) -> u32 {
        let count = self.finalizations.fetch_add(1, Ordering::AcqRel) + 1;
        if count > 1 {
            tracing::error!("Run finalized {} times", count);
        }
        count
    }

    /// How many times the buffered tables were written.
    pub fn finalizations(&self) -> u32 {
        self.finalizations.load(Ordering::Acquire)
    }

    pub fn termination(&self) -> Option<Termination> {
        *self.termination.lock()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Receiver that disconnects when the run terminates.
    ///
    /// Nothing is ever sent on it; use it as a `select!` arm.
    pub fn shutdown_signal(&self) -> Receiver<()> {
        self.shutdown_rx.clone()
    }

    /// Sleep up to `timeout`, returning early with `true` on shutdown.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        match self.shutdown_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_shutdown(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> RunContext {
        RunContext::new(RunEventLog::create(dir.path().join("run_events.csv")).unwrap())
    }

    #[test]
    fn test_first_terminator_wins() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        assert!(ctx.terminate(
            Termination::RunTimeout,
            &[RunEvent::RunTimeout, RunEvent::SupervisorFinished]
        ));
        assert!(!ctx.terminate(Termination::Completed, &[RunEvent::RunCompleted]));
        assert!(!ctx.record(RunEvent::TargetPoseReached));

        assert_eq!(ctx.termination(), Some(Termination::RunTimeout));
        assert_eq!(
            ctx.events().events(),
            vec![RunEvent::RunTimeout, RunEvent::SupervisorFinished]
        );
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let dir = TempDir::new().unwrap();
        let ctx = Arc::new(context(&dir));
        let signal = ctx.shutdown_signal();

        let waiter = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || {
                let start = Instant::now();
                let woke = ctx.wait_for_shutdown(Duration::from_secs(10));
                (woke, start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        ctx.terminate(Termination::Interrupted, &[]);

        let (woke, elapsed) = waiter.join().unwrap();
        assert!(woke);
        assert!(elapsed < Duration::from_secs(5));
        assert!(signal.recv().is_err());
    }

    #[test]
    fn test_finalization_count() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert_eq!(ctx.finalizations(), 0);
        assert_eq!(ctx.mark_finalized(), 1);
        assert_eq!(ctx.mark_finalized(), 2);
        assert_eq!(ctx.finalizations(), 2);
    }

    #[test]
    fn test_wait_times_out_without_shutdown() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(!ctx.wait_for_shutdown(Duration::from_millis(10)));
    }

    #[test]
    fn test_ground_truth_replace() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);

        assert!(ctx.latest_ground_truth().is_none());
        ctx.set_ground_truth(Pose2D::new(1.0, 2.0, 0.0));
        ctx.set_ground_truth(Pose2D::new(3.0, 4.0, 0.0));
        assert_eq!(ctx.latest_ground_truth().map(|p| p.x), Some(3.0));
    }
}
