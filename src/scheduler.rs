//! Interval scheduler
//!
//! One tokio task per job. Each task awaits its run inline, so a job is
//! never in flight twice; ticks that fall due meanwhile are skipped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::pipeline::Job;

struct Entry {
    job: Arc<dyn Job>,
    every: Duration,
}

pub struct Scheduler {
    entries: Vec<Entry>,
    run_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(run_timeout: Duration, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            entries: Vec::new(),
            run_timeout,
            shutdown_tx,
        }
    }

    /// Registers a job to run immediately and then every `every`
    pub fn add(&mut self, job: Arc<dyn Job>, every: Duration) -> &mut Self {
        self.entries.push(Entry { job, every });
        self
    }

    pub fn job_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.job.name().to_string()).collect()
    }

    /// Runs every job until the shutdown signal fires, then waits for the
    /// job loops to exit. A run in progress finishes first.
    pub async fn run(self) {
        let mut handles = Vec::with_capacity(self.entries.len());

        for Entry { job, every } in self.entries {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let run_timeout = self.run_timeout;

            handles.push(tokio::spawn(async move {
                let name = job.name().to_string();
                let mut ticker = interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(job = %name, every = %humantime::format_duration(every), "Job scheduled");

                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!(job = %name, "Job loop stopped");
                            break;
                        }
                        _ = ticker.tick() => {
                            run_once(job.as_ref(), run_timeout).await;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job task panicked");
            }
        }
    }
}

/// Executes a single run under the run timeout. Never fails: errors are
/// logged and the next tick proceeds.
pub async fn run_once(job: &dyn Job, run_timeout: Duration) {
    let name = job.name();

    match timeout(run_timeout, job.run()).await {
        Ok(Ok(report)) => {
            debug!(job = %name, run_id = %report.run_id, stages = report.stages.len(), "Run completed");
        }
        Ok(Err(e)) => {
            error!(job = %name, error = %e, kind = e.kind(), "Run failed");
        }
        Err(_) => {
            warn!(
                job = %name,
                timeout = %humantime::format_duration(run_timeout),
                "Run timed out"
            );
            metrics::record_run(name, "timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::pipeline::RunReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        work: Duration,
    }

    impl CountingJob {
        fn new(work: Duration) -> Self {
            Self {
                runs: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                work,
            }
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> Result<RunReport> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RunReport::new("counting"))
        }
    }

    #[tokio::test]
    async fn test_run_once_times_out() {
        let job = CountingJob::new(Duration::from_millis(200));
        run_once(&job, Duration::from_millis(20)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_runs_never_overlap_and_stop_on_shutdown() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let job = Arc::new(CountingJob::new(Duration::from_millis(30)));

        let mut scheduler = Scheduler::new(Duration::from_secs(1), shutdown_tx.clone());
        scheduler.add(job.clone(), Duration::from_millis(5));
        assert_eq!(scheduler.job_names(), vec!["counting"]);

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(job.runs.load(Ordering::SeqCst) >= 2);
        assert_eq!(job.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
