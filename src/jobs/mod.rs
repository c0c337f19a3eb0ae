use crate::{context::AppContext, error::WardenResult, metrics};
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

pub mod expiry;
pub mod peers;
pub mod schedule;
pub mod sync;

pub use expiry::ExpiryOutcome;
pub use peers::ReconcileOutcome;

pub const EXPIRY_JOB: &str = "expiry_check";
pub const PEER_SYNC_JOB: &str = "peer_sync";

/// Job scheduler for background tasks
///
/// Owns the timer tasks of both jobs. Each job has a running flag so a tick
/// that arrives while the previous run is still in progress is dropped.
pub struct JobScheduler {
    context: Arc<AppContext>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    expiry_running: AtomicBool,
    peers_running: AtomicBool,
}

/// Holds a job's running flag for the duration of one run
struct RunGuard<'a> {
    flag: &'a AtomicBool,
    job: &'static str,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool, job: &'static str) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        metrics::set_job_running(job, true);
        Some(Self { flag, job })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        metrics::set_job_running(self.job, false);
    }
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            context,
            shutdown,
            handles: Mutex::new(Vec::new()),
            expiry_running: AtomicBool::new(false),
            peers_running: AtomicBool::new(false),
        }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) -> WardenResult<()> {
        let jobs = &self.context.config.jobs;
        let tz = jobs.tz()?;
        let at = jobs.expiry_time()?;

        info!("Starting background job scheduler");

        let expiry = tokio::spawn(Self::expiry_check_job(
            Arc::clone(&self),
            at,
            tz,
            self.shutdown.subscribe(),
        ));
        let peers = tokio::spawn(Self::peer_sync_job(Arc::clone(&self), self.shutdown.subscribe()));

        match self.handles.lock() {
            Ok(mut handles) => handles.extend([expiry, peers]),
            Err(poisoned) => poisoned.into_inner().extend([expiry, peers]),
        }

        info!("Background jobs started");
        Ok(())
    }

    /// Stop both job loops and wait for them to exit.
    ///
    /// A run that is already in progress completes first.
    pub async fn shutdown(&self) {
        info!("Stopping background job scheduler");
        // Receivers may already be gone if the loops exited
        let _ = self.shutdown.send(true);

        let handles: Vec<_> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background job task failed: {}", e);
            }
        }

        info!("Background jobs stopped");
    }

    pub fn is_running(&self, job: &str) -> bool {
        match job {
            EXPIRY_JOB => self.expiry_running.load(Ordering::Acquire),
            PEER_SYNC_JOB => self.peers_running.load(Ordering::Acquire),
            _ => false,
        }
    }

    /// Run the expiration check now, unless it is already running
    pub async fn run_expiry_once(&self) -> Option<ExpiryOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.expiry_running, EXPIRY_JOB) else {
            warn!("Expiry check still running, skipping tick");
            metrics::record_job_skipped(EXPIRY_JOB);
            return None;
        };

        info!("Running expiry check");
        let started = Instant::now();

        let result = expiry::enforce_expirations(
            self.context.store.as_ref(),
            self.context.controller.as_ref(),
            Utc::now(),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => {
                metrics::record_job_run(EXPIRY_JOB, "success", elapsed);
                metrics::record_expiry(outcome.users_deactivated, outcome.members_deauthorized);

                if outcome.users_expired > 0 {
                    info!(
                        users_deactivated = outcome.users_deactivated,
                        users_failed = outcome.users_failed,
                        members_deauthorized = outcome.members_deauthorized,
                        networks_failed = outcome.networks_failed,
                        "Expiry check finished"
                    );
                } else {
                    info!("Expiry check: no expired users found");
                }
                Some(outcome)
            }
            Err(e) => {
                metrics::record_job_run(EXPIRY_JOB, "error", elapsed);
                error!("Failed to run expiry check: {}", e);
                None
            }
        }
    }

    /// Run peer reconciliation now, unless it is already running
    pub async fn run_peer_sync_once(&self) -> Option<ReconcileOutcome> {
        let Some(_guard) = RunGuard::acquire(&self.peers_running, PEER_SYNC_JOB) else {
            warn!("Peer sync still running, skipping tick");
            metrics::record_job_skipped(PEER_SYNC_JOB);
            return None;
        };

        let started = Instant::now();
        let outcome = peers::run_guarded(
            self.context.store.as_ref(),
            self.context.controller.as_ref(),
            Utc::now(),
            self.context.config.jobs.peer_inactivity(),
        )
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Some(outcome) => {
                metrics::record_job_run(PEER_SYNC_JOB, "success", elapsed);
                metrics::record_reconcile(
                    outcome.networks_synced,
                    outcome.networks_skipped,
                    outcome.networks_failed,
                    outcome.networks_deduplicated,
                    outcome.members_written,
                );
                info!(
                    users = outcome.users_considered,
                    synced = outcome.networks_synced,
                    skipped = outcome.networks_skipped,
                    failed = outcome.networks_failed,
                    deduplicated = outcome.networks_deduplicated,
                    members_written = outcome.members_written,
                    "Peer sync finished"
                );
                Some(outcome)
            }
            None => {
                metrics::record_job_run(PEER_SYNC_JOB, "error", elapsed);
                None
            }
        }
    }

    /// Expire lapsed accounts (runs daily at a fixed local time)
    async fn expiry_check_job(
        scheduler: Arc<Self>,
        at: NaiveTime,
        tz: Tz,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            // Never schedule the same slot twice if the wall clock lags the timer
            let now = last_fire.map_or_else(Utc::now, |last| Utc::now().max(last));
            let next = schedule::next_daily_run(now, at, tz);
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            info!("Next expiry check at {} ({}s)", next.with_timezone(&tz), wait.as_secs());

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    last_fire = Some(next);
                    scheduler.run_expiry_once().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Reconcile peers of idle users (runs every few minutes)
    async fn peer_sync_job(scheduler: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = interval(scheduler.context.config.jobs.peer_sync_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    scheduler.run_peer_sync_once().await;
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
