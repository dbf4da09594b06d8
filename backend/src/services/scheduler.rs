//! Background refresh of due locations
//!
//! Each tick selects due locations and drains them through a fixed-size
//! worker pool. Every location refresh runs as its own task so a panic or a
//! slow provider call only affects that one location.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, MissedTickBehavior};

use super::refresh::RefreshCoordinator;
use super::refresh_state::RefreshStateStore;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::AppResult;
use crate::models::{BatchReport, Location};

pub struct RefreshScheduler {
    coordinator: Arc<RefreshCoordinator>,
    states: Arc<dyn RefreshStateStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl RefreshScheduler {
    pub fn new(
        coordinator: Arc<RefreshCoordinator>,
        states: Arc<dyn RefreshStateStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            coordinator,
            states,
            clock,
            config,
        }
    }

    /// Tick until `shutdown` flips to true. A tick in progress is allowed to
    /// finish before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            tick_interval_secs = self.config.tick_interval_secs,
            batch_size = self.config.batch_size,
            workers = self.config.worker_pool_size,
            "Refresh scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "Refresh tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Refresh scheduler stopped");
    }

    /// Refresh every location due now, up to the batch size
    pub async fn tick(&self) -> AppResult<BatchReport> {
        let started_at = self.clock.now();
        let started = Instant::now();

        let due = self
            .states
            .due_locations(started_at, self.config.batch_size)
            .await?
            .into_iter()
            .filter(|location| match self.coordinator.deferred_until(location.id, started_at) {
                Some(until) => {
                    tracing::debug!(
                        location_id = %location.id,
                        %until,
                        "Skipping location, last attempt was not recorded"
                    );
                    false
                }
                None => true,
            })
            .collect::<Vec<_>>();

        if due.is_empty() {
            tracing::debug!("No locations due for refresh");
            return Ok(BatchReport {
                started_at,
                attempted: 0,
                succeeded: 0,
                failed: 0,
                elapsed_ms: 0,
            });
        }

        let attempted = due.len() as u32;
        let succeeded = self.drain(due).await;

        let report = BatchReport {
            started_at,
            attempted,
            succeeded,
            failed: attempted - succeeded,
            elapsed_ms: started.elapsed().as_millis() as i64,
        };

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            status = report.status(),
            "Refresh batch complete"
        );

        if let Err(err) = self.states.record_batch(&report).await {
            tracing::error!(error = %err, "Failed to record refresh batch");
        }

        Ok(report)
    }

    /// Run the queue through the worker pool, returning the success count
    async fn drain(&self, due: Vec<Location>) -> u32 {
        let (tx, rx) = mpsc::channel(due.len());
        for location in due {
            // capacity equals the batch, so this never waits
            if tx.send(location).await.is_err() {
                break;
            }
        }
        drop(tx);

        let queue = Arc::new(Mutex::new(rx));
        let workers = (self.config.worker_pool_size as usize).max(1);
        let spacing = self.config.min_call_spacing();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let coordinator = Arc::clone(&self.coordinator);
            handles.push(tokio::spawn(async move {
                let mut succeeded = 0u32;
                let mut first = true;
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(location) = next else { break };

                    if !first && !spacing.is_zero() {
                        sleep(spacing).await;
                    }
                    first = false;

                    if refresh_one(Arc::clone(&coordinator), location, worker).await {
                        succeeded += 1;
                    }
                }
                succeeded
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await {
                Ok(count) => succeeded += count,
                Err(err) => tracing::error!(error = %err, "Refresh worker stopped unexpectedly"),
            }
        }
        succeeded
    }
}

async fn refresh_one(coordinator: Arc<RefreshCoordinator>, location: Location, worker: usize) -> bool {
    let location_id = location.id;
    let task = tokio::spawn(async move { coordinator.refresh(&location).await });

    match task.await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            tracing::debug!(%location_id, worker, error = %err, "Location refresh failed");
            false
        }
        Err(err) => {
            tracing::error!(%location_id, worker, error = %err, "Location refresh panicked");
            false
        }
    }
}
