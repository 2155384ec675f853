//! Run Progress Streaming
//!
//! Publishes progress two ways:
//!
//! - a `watch` channel holding the latest [`RunSnapshot`] (observers poll or
//!   await changes, never block the run)
//! - a `broadcast` channel of [`ProgressEvent`]s for streaming consumers
//!
//! ## Features
//!
//! - Monotonic progress fraction (completed batches / total batches)
//! - ETA and throughput from completed rows
//! - Alert events forwarded from the usage recorder

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};

use super::run::{RunSnapshot, RunStatus};
use crate::ai::{AlertEvent, AlertLevel};
use crate::constants::pipeline::EVENT_CHANNEL_CAPACITY;
use crate::types::{AnalysisSource, RunId};

/// Progress event types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Batches planned and dispatch about to begin
    RunStarted {
        run_id: RunId,
        rows: usize,
        batches: usize,
        batch_size: usize,
        workers: usize,
    },
    BatchCompleted {
        batch_index: usize,
        rows: usize,
        source: AnalysisSource,
        attempts: u32,
        completed: usize,
        total: usize,
        throughput: f64, // rows per second
    },
    /// Batch rows were replaced by error placeholders
    BatchFailed {
        batch_index: usize,
        error: String,
        recoverable: bool,
    },
    Alert {
        level: AlertLevel,
        metric: &'static str,
        utilization: f64,
    },
    EtaUpdate { remaining_secs: u64 },
    Message {
        level: MessageLevel,
        message: String,
    },
    Finished {
        status: RunStatus,
        total_duration_ms: u64,
        summary: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Progress tracker shared by the orchestrator and the host
pub struct ProgressTracker {
    run_id: RunId,
    snapshots: Arc<watch::Sender<RunSnapshot>>,
    sender: broadcast::Sender<ProgressEvent>,
    start_time: Arc<RwLock<Option<Instant>>>,
    status: Arc<RwLock<RunStatus>>,
    batches_total: Arc<AtomicUsize>,
    batches_done: Arc<AtomicUsize>,
    rows_total: Arc<AtomicUsize>,
    rows_done: Arc<AtomicUsize>,
    /// Alerts already forwarded as events
    alerts_seen: Arc<AtomicUsize>,
}

impl ProgressTracker {
    pub fn new(run_id: RunId) -> Self {
        let (snapshots, _) = watch::channel(RunSnapshot::pending(run_id));
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            run_id,
            snapshots: Arc::new(snapshots),
            sender,
            start_time: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(RunStatus::Pending)),
            batches_total: Arc::new(AtomicUsize::new(0)),
            batches_done: Arc::new(AtomicUsize::new(0)),
            rows_total: Arc::new(AtomicUsize::new(0)),
            rows_done: Arc::new(AtomicUsize::new(0)),
            alerts_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Send an event through the broadcast channel.
    /// Silently discards if no receivers are listening.
    #[inline]
    fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to snapshot updates
    pub fn watch(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.subscribe()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        *self
            .status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    /// Build and publish a snapshot while holding the watch lock, so a
    /// publisher with stale counters cannot overwrite a newer snapshot.
    fn publish(&self) {
        self.snapshots.send_if_modified(|current| {
            let total = self.batches_total.load(Ordering::SeqCst);
            let done = self.batches_done.load(Ordering::SeqCst);
            if done < current.batches_done {
                return false;
            }
            let status = self.status();
            let progress_fraction = if status == RunStatus::Succeeded {
                1.0
            } else if total > 0 {
                (done as f64 / total as f64).min(1.0)
            } else {
                0.0
            };

            *current = RunSnapshot {
                run_id: self.run_id,
                status,
                progress_fraction,
                batches_total: total,
                batches_done: done,
                rows_done: self.rows_done.load(Ordering::SeqCst),
                elapsed: self.elapsed(),
            };
            true
        });
    }

    /// Move to `next` if the transition is legal; returns whether it happened
    fn transition(&self, next: RunStatus) -> bool {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !status.can_transition_to(next) {
            return false;
        }
        *status = next;
        true
    }

    /// Start tracking a run of `batches` batches over `rows` rows
    pub fn start(&self, rows: usize, batches: usize, batch_size: usize, workers: usize) {
        *self
            .start_time
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
        self.batches_total.store(batches, Ordering::SeqCst);
        self.rows_total.store(rows, Ordering::SeqCst);
        self.transition(RunStatus::Running);
        self.publish();

        self.emit(ProgressEvent::RunStarted {
            run_id: self.run_id,
            rows,
            batches,
            batch_size,
            workers,
        });
    }

    /// Count a finished batch and publish; returns (completed, total, throughput)
    fn advance(&self, rows: usize) -> (usize, usize, f64) {
        let completed = self.batches_done.fetch_add(1, Ordering::SeqCst) + 1;
        let rows_done = self.rows_done.fetch_add(rows, Ordering::SeqCst) + rows;
        let total = self.batches_total.load(Ordering::SeqCst);

        let elapsed = self.elapsed().as_secs_f64();
        let throughput = rows_done as f64 / elapsed.max(0.1);
        self.publish();

        let remaining = self.rows_total.load(Ordering::SeqCst).saturating_sub(rows_done);
        if throughput > 0.0 && remaining > 0 {
            self.emit(ProgressEvent::EtaUpdate {
                remaining_secs: (remaining as f64 / throughput) as u64,
            });
        }
        (completed, total, throughput)
    }

    /// Record a batch whose rows were analyzed
    pub fn batch_completed(
        &self,
        batch_index: usize,
        rows: usize,
        source: AnalysisSource,
        attempts: u32,
    ) {
        let (completed, total, throughput) = self.advance(rows);
        self.emit(ProgressEvent::BatchCompleted {
            batch_index,
            rows,
            source,
            attempts,
            completed,
            total,
            throughput,
        });
    }

    /// Record a batch whose rows were replaced by error placeholders
    pub fn batch_failed(&self, batch_index: usize, rows: usize, error: &str, recoverable: bool) {
        self.advance(rows);
        self.emit(ProgressEvent::BatchFailed {
            batch_index,
            error: error.to_string(),
            recoverable,
        });

        self.emit(ProgressEvent::Message {
            level: if recoverable {
                MessageLevel::Warning
            } else {
                MessageLevel::Error
            },
            message: format!("batch {}: {}", batch_index, error),
        });
    }

    /// Forward alerts not yet seen. `alerts` is the recorder's full,
    /// append-only list; an older, shorter copy forwards nothing.
    pub fn forward_alerts(&self, alerts: &[AlertEvent]) {
        let seen = self.alerts_seen.fetch_max(alerts.len(), Ordering::SeqCst);
        for alert in alerts.iter().skip(seen) {
            self.emit(ProgressEvent::Alert {
                level: alert.level,
                metric: alert.metric,
                utilization: alert.utilization,
            });
        }
    }

    /// Send a status message
    pub fn message(&self, level: MessageLevel, message: &str) {
        self.emit(ProgressEvent::Message {
            level,
            message: message.to_string(),
        });
    }

    /// Enter a terminal status. Only the first terminal transition wins.
    pub fn finish(&self, status: RunStatus, summary: &str) -> bool {
        if !self.transition(status) {
            return false;
        }
        self.publish();

        self.emit(ProgressEvent::Finished {
            status,
            total_duration_ms: self.elapsed().as_millis() as u64,
            summary: summary.to_string(),
        });
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

impl Clone for ProgressTracker {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id,
            snapshots: Arc::clone(&self.snapshots),
            sender: self.sender.clone(),
            start_time: Arc::clone(&self.start_time),
            status: Arc::clone(&self.status),
            batches_total: Arc::clone(&self.batches_total),
            batches_done: Arc::clone(&self.batches_done),
            rows_total: Arc::clone(&self.rows_total),
            rows_done: Arc::clone(&self.rows_done),
            alerts_seen: Arc::clone(&self.alerts_seen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_creation() {
        let tracker = ProgressTracker::new(RunId::new());
        assert_eq!(tracker.status(), RunStatus::Pending);
        assert_eq!(tracker.snapshot().progress_fraction, 0.0);
        assert!(!tracker.is_terminal());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let tracker = ProgressTracker::new(RunId::new());
        let watcher = tracker.watch();
        tracker.start(30, 3, 10, 1);
        assert_eq!(watcher.borrow().status, RunStatus::Running);

        let mut last = 0.0;
        for index in 0..3 {
            tracker.batch_completed(index, 10, AnalysisSource::Synthetic, 0);
            let fraction = tracker.snapshot().progress_fraction;
            assert!(fraction >= last);
            last = fraction;
        }
        assert_eq!(last, 1.0);
        assert_eq!(tracker.snapshot().rows_done, 30);
    }

    #[test]
    fn test_first_terminal_status_wins() {
        let tracker = ProgressTracker::new(RunId::new());
        tracker.start(10, 1, 10, 1);
        assert!(tracker.finish(RunStatus::Cancelled, "cancelled"));
        assert!(!tracker.finish(RunStatus::Succeeded, "late"));
        assert_eq!(tracker.snapshot().status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let tracker = ProgressTracker::new(RunId::new());
        let mut events = tracker.subscribe();
        tracker.start(10, 1, 10, 1);
        tracker.batch_failed(0, 10, "boom", true);

        assert!(matches!(
            events.recv().await.unwrap(),
            ProgressEvent::RunStarted { batches: 1, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            ProgressEvent::BatchFailed { batch_index: 0, recoverable: true, .. }
        ));
    }

    #[test]
    fn test_alerts_forwarded_once() {
        let tracker = ProgressTracker::new(RunId::new());
        let mut events = tracker.subscribe();
        let alert = AlertEvent {
            level: AlertLevel::Warning,
            metric: "requests",
            utilization: 0.8,
            timestamp: chrono::Utc::now(),
        };

        tracker.forward_alerts(std::slice::from_ref(&alert));
        tracker.forward_alerts(std::slice::from_ref(&alert));
        assert!(matches!(events.try_recv(), Ok(ProgressEvent::Alert { .. })));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stale_alert_list_forwards_nothing() {
        let tracker = ProgressTracker::new(RunId::new());
        let mut events = tracker.subscribe();
        let alert = |metric| AlertEvent {
            level: AlertLevel::Warning,
            metric,
            utilization: 0.8,
            timestamp: chrono::Utc::now(),
        };
        let both = [alert("requests"), alert("tokens")];

        tracker.forward_alerts(&both);
        tracker.forward_alerts(&both[..1]);
        tracker.forward_alerts(&both);
        assert!(matches!(events.try_recv(), Ok(ProgressEvent::Alert { metric: "requests", .. })));
        assert!(matches!(events.try_recv(), Ok(ProgressEvent::Alert { metric: "tokens", .. })));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_batches_never_publish_stale_progress() {
        let tracker = ProgressTracker::new(RunId::new());
        tracker.start(8 * 50, 8 * 50, 1, 8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let tracker = tracker.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        let (completed, _, _) = tracker.advance(1);
                        assert!(tracker.snapshot().batches_done >= completed);
                    }
                });
            }
        });

        let last = tracker.snapshot();
        assert_eq!(last.batches_done, 400);
        assert_eq!(last.progress_fraction, 1.0);
    }
}
