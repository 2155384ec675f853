//! Console progress rendering for a hosted run.

use console::style;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::pipeline::{MessageLevel, ProgressEvent, RunHandle, RunSnapshot};

const BAR_WIDTH: usize = 30;

pub struct ConsoleRenderer {
    show_eta: bool,
    eta_secs: Option<u64>,
    throughput: f64,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            show_eta: true,
            eta_secs: None,
            throughput: 0.0,
        }
    }

    pub fn with_eta(mut self, show: bool) -> Self {
        self.show_eta = show;
        self
    }

    /// One status line for `snapshot`
    pub fn render(&self, snapshot: &RunSnapshot) -> String {
        let spinner = {
            let chars = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
            let idx = (snapshot.elapsed.as_millis() / 100) as usize % chars.len();
            chars[idx]
        };

        let eta = match (self.show_eta, self.eta_secs) {
            (true, Some(secs)) => format!(" ETA: {}", format_duration(secs)),
            _ => String::new(),
        };

        let throughput = if self.throughput > 0.0 {
            format!(" ({:.1} rows/s)", self.throughput)
        } else {
            String::new()
        };

        format!(
            "{} {} {} {}/{} batches, {} rows{}{}",
            style(spinner).cyan(),
            style(snapshot.status).bold(),
            render_progress_bar(snapshot.batches_done, snapshot.batches_total, BAR_WIDTH),
            snapshot.batches_done,
            snapshot.batches_total,
            snapshot.rows_done,
            throughput,
            eta
        )
    }

    /// Fold an event into the renderer; returns a line to print above the bar
    pub fn observe(&mut self, event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::EtaUpdate { remaining_secs } => {
                self.eta_secs = Some(*remaining_secs);
                None
            }
            ProgressEvent::BatchCompleted { throughput, .. } => {
                self.throughput = *throughput;
                None
            }
            ProgressEvent::Alert {
                level,
                metric,
                utilization,
            } => Some(format!(
                "{} {:?} usage alert: {} at {:.0}%",
                style("⚠").yellow(),
                level,
                metric,
                utilization * 100.0
            )),
            ProgressEvent::Message { level, message } => match level {
                MessageLevel::Warning => Some(format!("{} {}", style("⚠").yellow(), message)),
                MessageLevel::Error => Some(format!("{} {}", style("✗").red(), message)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Render until the run is terminal. Ctrl-C requests cancellation.
    pub async fn follow(mut self, handle: &RunHandle) {
        let mut snapshots: watch::Receiver<RunSnapshot> = handle.subscribe();
        let mut events = handle.events();
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        let mut interrupted = false;

        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(line) = self.observe(&event) {
                            eprintln!("\r\x1B[K{}", line);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    eprintln!(
                        "\r\x1B[K{} cancelling, waiting for in-flight batches",
                        style("⚠").yellow()
                    );
                    handle.cancel();
                }
                _ = ticker.tick() => {}
            }

            let snapshot = snapshots.borrow_and_update().clone();
            eprint!("\r\x1B[K{}", self.render(&snapshot));
            if snapshot.status.is_terminal() {
                break;
            }
        }

        eprintln!();
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunStatus;
    use crate::types::RunId;

    #[test]
    fn test_progress_bar() {
        assert_eq!(render_progress_bar(0, 0, 4), "[    ]");
        assert_eq!(render_progress_bar(1, 2, 4), "[██░░]");
        assert_eq!(render_progress_bar(5, 2, 4), "[████]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
    }

    #[test]
    fn test_render_includes_counts_and_eta() {
        let mut renderer = ConsoleRenderer::new();
        renderer.observe(&ProgressEvent::EtaUpdate { remaining_secs: 90 });

        let mut snapshot = RunSnapshot::pending(RunId::new());
        snapshot.status = RunStatus::Running;
        snapshot.batches_total = 4;
        snapshot.batches_done = 1;
        snapshot.rows_done = 100;

        let line = renderer.render(&snapshot);
        assert!(line.contains("1/4 batches"));
        assert!(line.contains("100 rows"));
        assert!(line.contains("ETA: 1m 30s"));
        assert!(!ConsoleRenderer::new().with_eta(false).render(&snapshot).contains("ETA"));
    }

    #[test]
    fn test_observe_surfaces_warnings_only() {
        let mut renderer = ConsoleRenderer::new();
        assert!(
            renderer
                .observe(&ProgressEvent::Message {
                    level: MessageLevel::Info,
                    message: "quiet".into(),
                })
                .is_none()
        );
        let line = renderer.observe(&ProgressEvent::Message {
            level: MessageLevel::Warning,
            message: "batch 2: upstream 503".into(),
        });
        assert!(line.unwrap().contains("upstream 503"));
    }
}
