use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use loadbeat_common::{HubEvent, SimulationUpdate};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{RequestExecutor, RequestOutcome};
use crate::hub::HubHandle;
use crate::rate::RateModel;
use crate::report::{build_report, PerformanceReport, RunSummary};
use crate::simulation::{SimulationConfig, SimulationRun, SimulationStatus};
use crate::stats::{ErrorRatePoint, MetricsAggregator, ThroughputPoint};

/// Buffer between request tasks and the per-run outcome consumer.
const OUTCOME_CHANNEL_BUFFER: usize = 1_024;

/// How long the teardown path waits for the outcome consumer to drain.
const CONSUMER_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

struct RunState {
    status: SimulationStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Shared handle to one simulation run.
///
/// Owned by the run task while the simulation is active; the manager and
/// API hold clones for snapshots, which stay valid after termination.
pub struct RunHandle {
    pub id: Uuid,
    config: SimulationConfig,
    state: RwLock<RunState>,
    metrics: Arc<MetricsAggregator>,
    cancel_tx: watch::Sender<bool>,
}

impl RunHandle {
    pub async fn status(&self) -> SimulationStatus {
        self.state.read().await.status
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    /// Apply a state transition, enforcing the lifecycle graph.
    async fn transition(&self, next: SimulationStatus) -> bool {
        let mut state = self.state.write().await;
        if !state.status.can_transition_to(next) {
            warn!(
                simulation_id = %self.id,
                from = state.status.as_str(),
                to = next.as_str(),
                "Rejected invalid state transition"
            );
            return false;
        }
        debug!(
            simulation_id = %self.id,
            from = state.status.as_str(),
            to = next.as_str(),
            "State transition"
        );
        state.status = next;
        if next == SimulationStatus::Running {
            state.started_at = Some(Utc::now());
        } else if next.is_terminal() {
            state.ended_at = Some(Utc::now());
        }
        true
    }

    pub async fn snapshot(&self) -> SimulationRun {
        let state = self.state.read().await;
        let counts = self.metrics.counts();
        SimulationRun {
            id: self.id,
            config: self.config.clone(),
            status: state.status,
            started_at: state.started_at,
            ended_at: state.ended_at,
            total_requests: counts.total,
            successful_requests: counts.successful,
            failed_requests: counts.failed,
            skipped_dispatches: counts.skipped,
        }
    }

    pub async fn summary(&self) -> RunSummary {
        let (started_at, ended_at) = {
            let state = self.state.read().await;
            (state.started_at, state.ended_at)
        };
        let duration_seconds = match (started_at, ended_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
            (Some(start), None) => (Utc::now() - start).num_milliseconds().max(0) as f64 / 1000.0,
            _ => self.config.duration_seconds as f64,
        };

        let counts = self.metrics.counts();
        let stats = self.metrics.response_time_stats();
        RunSummary {
            simulation_id: self.id,
            target_url: self.config.target_url.clone(),
            duration_seconds,
            total_requests: counts.total,
            average_rps: if duration_seconds > 0.0 {
                counts.total as f64 / duration_seconds
            } else {
                0.0
            },
            success_rate_percent: if counts.total == 0 {
                0.0
            } else {
                counts.successful as f64 / counts.total as f64 * 100.0
            },
            avg_response_time_ms: self.metrics.all_time_mean_ms(),
            p95_response_time_ms: stats.p95_ms,
        }
    }
}

/// Registry and lifecycle owner for all simulation runs in the process.
///
/// Each run gets its own tick-loop task and private worker pool; the
/// manager only brokers start/stop requests and read-only snapshots, so
/// runs never contend with each other.
pub struct SimulationManager {
    engine: EngineConfig,
    hub: HubHandle,
    runs: DashMap<Uuid, Arc<RunHandle>>,
}

impl SimulationManager {
    pub fn new(engine: EngineConfig, hub: HubHandle) -> Self {
        Self {
            engine,
            hub,
            runs: DashMap::new(),
        }
    }

    /// Validate the configuration and launch a run.
    ///
    /// Configuration errors are returned synchronously; once an id is
    /// handed out the run exists and will reach a terminal state on its own.
    pub fn start(&self, config: SimulationConfig) -> Result<Uuid> {
        config.validate()?;

        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = Arc::new(RunHandle {
            id,
            config: config.clone(),
            state: RwLock::new(RunState {
                status: SimulationStatus::Created,
                started_at: None,
                ended_at: None,
            }),
            metrics: Arc::new(MetricsAggregator::new(
                self.engine.sample_capacity,
                self.engine.time_series_capacity,
            )),
            cancel_tx,
        });
        self.runs.insert(id, Arc::clone(&handle));

        counter!("loadgen_simulations_started", 1);
        info!(
            simulation_id = %id,
            target = %config.target_url,
            min_rps = config.min_rps,
            max_rps = config.max_rps,
            duration_seconds = config.duration_seconds,
            concurrent_users = config.concurrent_users,
            "Simulation created"
        );

        tokio::spawn(run_simulation(
            handle,
            self.hub.clone(),
            cancel_rx,
            self.engine.tick_interval(),
            self.engine.drain_grace(),
        ));

        Ok(id)
    }

    /// Request cancellation of a run. In-flight requests get the configured
    /// grace period before being abandoned.
    pub async fn stop(&self, id: Uuid) -> Result<()> {
        let handle = self
            .get(id)
            .ok_or_else(|| EngineError::Lifecycle(format!("unknown simulation {id}")))?;

        let status = handle.status().await;
        if status.is_terminal() {
            return Err(EngineError::Lifecycle(format!(
                "simulation {id} is already {}",
                status.as_str()
            )));
        }

        let _ = handle.cancel_tx.send(true);
        info!(simulation_id = %id, "Stop requested");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn snapshot(&self, id: Uuid) -> Option<SimulationRun> {
        let handle = self.get(id)?;
        Some(handle.snapshot().await)
    }

    pub async fn list(&self) -> Vec<SimulationRun> {
        let handles: Vec<Arc<RunHandle>> = self
            .runs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshots.push(handle.snapshot().await);
        }
        snapshots
    }

    /// Time series for one run, oldest-first, truncated to `limit` points.
    pub fn time_series(
        &self,
        id: Uuid,
        limit: usize,
    ) -> Option<(Vec<ThroughputPoint>, Vec<ErrorRatePoint>)> {
        let handle = self.get(id)?;
        Some(handle.metrics.time_series(limit))
    }

    /// Aggregate a report over the given runs. Unknown ids are skipped so a
    /// partially stale id list still yields a valid report.
    pub async fn generate_report(&self, run_ids: &[Uuid]) -> PerformanceReport {
        let mut summaries = Vec::new();
        for id in run_ids {
            match self.get(*id) {
                Some(handle) => summaries.push(handle.summary().await),
                None => debug!(simulation_id = %id, "Skipping unknown run id in report"),
            }
        }
        build_report(summaries)
    }

    /// Signal cancellation to every non-terminal run.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<RunHandle>> = self
            .runs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handle in handles {
            if !handle.status().await.is_terminal() {
                let _ = handle.cancel_tx.send(true);
            }
        }
        info!("Cancellation signalled to all active simulations");
    }
}

/// Per-run driver: tick loop, dispatch, drain, terminal bookkeeping.
async fn run_simulation(
    handle: Arc<RunHandle>,
    hub: HubHandle,
    mut cancel_rx: watch::Receiver<bool>,
    tick_interval: Duration,
    grace: Duration,
) {
    handle.transition(SimulationStatus::Starting).await;

    let executor = match RequestExecutor::new(&handle.config) {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!(simulation_id = %handle.id, error = %e, "Simulation setup failed");
            handle.transition(SimulationStatus::Failed).await;
            handle.metrics.freeze();
            hub.publish(
                Some(handle.id),
                HubEvent::Error {
                    message: format!("simulation {} failed to start: {e}", handle.id),
                },
            )
            .await;
            return;
        }
    };

    let concurrent_users = handle.config.concurrent_users;
    let pool = Arc::new(Semaphore::new(concurrent_users as usize));
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<RequestOutcome>(OUTCOME_CHANNEL_BUFFER);

    let rate = RateModel::new(
        handle.config.scale_mode,
        handle.config.min_rps,
        handle.config.max_rps,
        handle.config.duration(),
    );

    handle.transition(SimulationStatus::Running).await;
    hub.publish(
        Some(handle.id),
        HubEvent::SimulationStarted {
            simulation_id: handle.id,
            target_url: handle.config.target_url.clone(),
            max_rps: handle.config.max_rps,
            duration_seconds: handle.config.duration_seconds,
        },
    )
    .await;

    // Outcomes arrive out of dispatch order; only completion time matters.
    let consumer_metrics = Arc::clone(&handle.metrics);
    let mut consumer = tokio::spawn(async move {
        while let Some(outcome) = outcome_rx.recv().await {
            consumer_metrics.record(&outcome);
        }
    });

    let started = Instant::now();
    let duration = handle.config.duration();
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Fractional dispatch carry keeps the long-term rate exact when the
    // per-tick request count is not an integer.
    let mut carry = 0.0f64;
    let tick_secs = tick_interval.as_secs_f64();

    let final_status = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let elapsed = started.elapsed();
                if elapsed >= duration {
                    break SimulationStatus::Completed;
                }

                let target_rps = rate.target_rps(elapsed);
                let want = target_rps * tick_secs + carry;
                let dispatch_count = want.floor() as u64;
                carry = want - dispatch_count as f64;

                let mut dispatched = 0u64;
                for _ in 0..dispatch_count {
                    match Arc::clone(&pool).try_acquire_owned() {
                        Ok(permit) => {
                            let executor = Arc::clone(&executor);
                            let outcome_tx = outcome_tx.clone();
                            tokio::spawn(async move {
                                let outcome = executor.execute().await;
                                let _ = outcome_tx.send(outcome).await;
                                drop(permit);
                            });
                            dispatched += 1;
                        }
                        Err(_) => {
                            // The pool is saturated; the rest of this tick's
                            // dispatches are skipped, never queued, so the
                            // tick cadence holds under target-limited capacity.
                            let skipped = dispatch_count - dispatched;
                            handle.metrics.record_skipped(skipped);
                            counter!("loadgen_dispatches_skipped", skipped);
                            warn!(
                                simulation_id = %handle.id,
                                skipped,
                                concurrent_users,
                                "Worker pool saturated, skipping dispatches this tick"
                            );
                            break;
                        }
                    }
                }
                counter!("loadgen_requests_dispatched", dispatched);

                let achieved_rps = handle.metrics.tick_point(tick_interval, target_rps);
                let counts = handle.metrics.counts();
                hub.publish(
                    Some(handle.id),
                    HubEvent::SimulationUpdate(SimulationUpdate {
                        simulation_id: handle.id,
                        timestamp: Utc::now(),
                        achieved_rps,
                        target_rps,
                        total_requests: counts.total,
                        successful_requests: counts.successful,
                        failed_requests: counts.failed,
                        response_time_stats: handle.metrics.response_time_stats(),
                    }),
                )
                .await;
            }
            changed = cancel_rx.changed() => {
                if changed.is_err() || *cancel_rx.borrow() {
                    break SimulationStatus::Cancelled;
                }
            }
        }
    };

    // Stop dispatching and give in-flight requests a bounded grace period
    // to finish. Whatever has not returned its permit by then is abandoned
    // and counted as failed so terminal accounting stays exact.
    drop(outcome_tx);
    let drained = tokio::time::timeout(grace, pool.acquire_many(concurrent_users)).await;
    let abandoned = match drained {
        Ok(_) => 0,
        Err(_) => concurrent_users as u64 - pool.available_permits() as u64,
    };

    if tokio::time::timeout(CONSUMER_DRAIN_TIMEOUT, &mut consumer)
        .await
        .is_err()
    {
        consumer.abort();
    }
    handle.metrics.freeze();
    if abandoned > 0 {
        warn!(
            simulation_id = %handle.id,
            abandoned,
            grace_seconds = grace.as_secs(),
            "Abandoned in-flight requests after grace period"
        );
        handle.metrics.record_abandoned(abandoned);
    }

    handle.transition(final_status).await;
    let counts = handle.metrics.counts();
    info!(
        simulation_id = %handle.id,
        status = final_status.as_str(),
        total = counts.total,
        successful = counts.successful,
        failed = counts.failed,
        skipped = counts.skipped,
        "Simulation finished"
    );
    counter!("loadgen_simulations_finished", 1);
    hub.publish(
        Some(handle.id),
        HubEvent::SimulationCompleted {
            simulation_id: handle.id,
            status: final_status.as_str().to_string(),
            total_requests: counts.total,
            successful_requests: counts.successful,
            failed_requests: counts.failed,
        },
    )
    .await;
}
