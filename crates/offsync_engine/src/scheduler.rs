//! Background job scheduling.
//!
//! Two job kinds run the orchestrator outside foreground execution: a
//! best-effort `Refresh` at a minimum interval and a daily `Maintenance`
//! job gated on connectivity (and optionally power). Each invocation
//! resubmits its own next occurrence before doing any work, runs under the
//! host's execution budget, and records its outcome durably. Nothing here
//! panics or propagates a failure into the host; a failed run simply waits
//! for the next occurrence.

use crate::cancel::CancelToken;
use crate::config::SchedulerConfig;
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use crate::orchestrator::SyncOrchestrator;
use async_trait::async_trait;
use offsync_protocol::Timestamp;
use offsync_storage::{KeyValueStore, KeyValueStoreExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SCHEDULER_NAMESPACE: &str = "scheduler";
const DAY_MS: i64 = 86_400_000;

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobKind {
    /// Short, frequent, best-effort sync.
    Refresh,
    /// Daily sync in a fixed window, requires connectivity.
    Maintenance,
}

impl JobKind {
    /// Every job kind.
    pub const ALL: [JobKind; 2] = [JobKind::Refresh, JobKind::Maintenance];

    /// Stable name, also the storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Refresh => "refresh",
            JobKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh" => Ok(JobKind::Refresh),
            "maintenance" => Ok(JobKind::Maintenance),
            other => Err(SyncError::Scheduler(format!("unknown job kind `{other}`"))),
        }
    }
}

/// A request for the host to run a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Job to run.
    pub kind: JobKind,
    /// Do not start before this time.
    pub earliest_start: Timestamp,
    /// Only start with network connectivity.
    pub requires_network: bool,
    /// Only start on external power.
    pub requires_power: bool,
}

/// Persisted outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The sync cycle completed.
    Success,
    /// The sync cycle failed.
    Failure,
    /// The host budget ran out before the cycle finished.
    Expired,
}

/// Durable run history of one job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    /// Start time of the last run.
    pub last_run: Option<Timestamp>,
    /// Runs so far.
    pub run_count: u64,
    /// Completed runs.
    pub success_count: u64,
    /// Failed or expired runs.
    pub failure_count: u64,
    /// Outcome of the last run.
    pub last_outcome: Option<RunOutcome>,
    /// Error message of the last failed run.
    pub last_error: Option<String>,
    /// Disabled jobs are neither submitted nor run.
    pub enabled: bool,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            last_run: None,
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_outcome: None,
            last_error: None,
            enabled: true,
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The cycle completed.
    Completed {
        /// Entities uploaded.
        uploaded: u64,
    },
    /// The cycle failed; the next occurrence retries.
    Failed(String),
    /// The execution budget ran out and the cycle was cancelled.
    Expired,
    /// The job is disabled and did nothing.
    Disabled,
}

/// Job records in a durable key-value store, one key per job kind.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl JobStore {
    /// Wraps `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Loads a record; a missing record is the default.
    pub fn load(&self, kind: JobKind) -> SyncResult<JobRecord> {
        Ok(self
            .store
            .get_cbor(SCHEDULER_NAMESPACE, kind.as_str())?
            .unwrap_or_default())
    }

    /// Read-modify-write of a record.
    pub fn update(&self, kind: JobKind, f: impl FnOnce(&mut JobRecord)) -> SyncResult<JobRecord> {
        let _guard = self.lock.lock();
        let mut record = self.load(kind)?;
        f(&mut record);
        self.store
            .put_cbor(SCHEDULER_NAMESPACE, kind.as_str(), &record)?;
        Ok(record)
    }

    /// Clears the run history, keeping the enabled flag.
    pub fn reset(&self, kind: JobKind) -> SyncResult<JobRecord> {
        self.update(kind, |record| {
            *record = JobRecord {
                enabled: record.enabled,
                ..JobRecord::default()
            };
        })
    }

    /// Every record, in [`JobKind::ALL`] order.
    pub fn all(&self) -> SyncResult<Vec<(JobKind, JobRecord)>> {
        JobKind::ALL
            .iter()
            .map(|kind| Ok((*kind, self.load(*kind)?)))
            .collect()
    }
}

/// Pluggable host backend (timer service, cron, mobile background tasks).
pub trait HostScheduler: Send + Sync {
    /// Schedules `request`, replacing any pending request of the same kind.
    fn submit(&self, request: JobRequest) -> SyncResult<()>;

    /// Cancels the pending request of `kind`, if any.
    fn cancel(&self, kind: JobKind);
}

/// Receives job invocations from a host backend.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs `kind`. `expiration` fires when the execution budget runs out.
    async fn run_job(&self, kind: JobKind, expiration: CancelToken) -> JobOutcome;
}

struct PendingTimer {
    generation: u64,
    request: JobRequest,
    handle: JoinHandle<()>,
}

struct HostInner {
    handler: RwLock<Option<Weak<dyn JobHandler>>>,
    network: Option<Arc<NetworkMonitor>>,
    execution_budget: Duration,
    timers: Mutex<HashMap<JobKind, PendingTimer>>,
    generation: AtomicU64,
}

/// Timer-backed host scheduler running jobs on the Tokio runtime.
///
/// `requires_network` waits for connectivity when a network monitor is
/// given. `requires_power` is not observable here and is ignored.
#[derive(Clone)]
pub struct TokioHostScheduler {
    inner: Arc<HostInner>,
}

impl TokioHostScheduler {
    /// Creates a backend granting `execution_budget` per invocation.
    pub fn new(execution_budget: Duration, network: Option<Arc<NetworkMonitor>>) -> Self {
        Self {
            inner: Arc::new(HostInner {
                handler: RwLock::new(None),
                network,
                execution_budget,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Sets the handler invoked when a job fires. Held weakly.
    pub fn attach(&self, handler: &Arc<dyn JobHandler>) {
        *self.inner.handler.write() = Some(Arc::downgrade(handler));
    }

    /// The request waiting to fire for `kind`.
    pub fn pending(&self, kind: JobKind) -> Option<JobRequest> {
        self.inner
            .timers
            .lock()
            .get(&kind)
            .map(|timer| timer.request.clone())
    }

    async fn fire(inner: Arc<HostInner>, request: JobRequest, generation: u64, delay: Duration) {
        tokio::time::sleep(delay).await;
        if request.requires_network {
            if let Some(network) = &inner.network {
                network.wait_for_connectivity().await;
            }
        }

        // Detach before running so the job can resubmit itself without
        // aborting this task.
        {
            let mut timers = inner.timers.lock();
            if timers
                .get(&request.kind)
                .is_some_and(|timer| timer.generation == generation)
            {
                timers.remove(&request.kind);
            }
        }

        let handler = inner.handler.read().as_ref().and_then(Weak::upgrade);
        let Some(handler) = handler else {
            debug!(kind = %request.kind, "job fired without a live handler");
            return;
        };

        let expiration = CancelToken::new();
        let budget = {
            let expiration = expiration.clone();
            let budget = inner.execution_budget;
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                expiration.cancel();
            })
        };
        let outcome = handler.run_job(request.kind, expiration).await;
        budget.abort();
        debug!(kind = %request.kind, ?outcome, "job invocation finished");
    }
}

impl HostScheduler for TokioHostScheduler {
    fn submit(&self, request: JobRequest) -> SyncResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| SyncError::Scheduler(format!("no async runtime: {err}")))?;
        if self.inner.handler.read().is_none() {
            return Err(SyncError::Scheduler("no job handler attached".into()));
        }

        let wait_ms = (request.earliest_start.as_millis() - Timestamp::now().as_millis()).max(0);
        let delay = Duration::from_millis(wait_ms as u64);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // The timer task takes this lock to detach itself, so it cannot
        // observe the map before its own entry is inserted.
        let mut timers = self.inner.timers.lock();
        let handle = runtime.spawn(Self::fire(
            Arc::clone(&self.inner),
            request.clone(),
            generation,
            delay,
        ));
        debug!(kind = %request.kind, delay_ms = wait_ms, "job submitted");
        if let Some(previous) = timers.insert(
            request.kind,
            PendingTimer {
                generation,
                request,
                handle,
            },
        ) {
            previous.handle.abort();
        }
        Ok(())
    }

    fn cancel(&self, kind: JobKind) {
        if let Some(timer) = self.inner.timers.lock().remove(&kind) {
            timer.handle.abort();
            debug!(%kind, "job cancelled");
        }
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        for timer in self.timers.get_mut().values() {
            timer.handle.abort();
        }
    }
}

/// Schedules and runs background sync jobs.
pub struct BackgroundScheduler {
    orchestrator: SyncOrchestrator,
    host: Arc<dyn HostScheduler>,
    jobs: JobStore,
    config: SchedulerConfig,
}

impl BackgroundScheduler {
    /// Creates a scheduler. Call [`register`](Self::register) to submit
    /// the jobs.
    pub fn new(
        orchestrator: SyncOrchestrator,
        host: Arc<dyn HostScheduler>,
        store: Arc<dyn KeyValueStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            host,
            jobs: JobStore::new(store),
            config,
        }
    }

    /// Creates a scheduler on a [`TokioHostScheduler`] and wires the two
    /// together.
    pub fn with_tokio_host(
        orchestrator: SyncOrchestrator,
        store: Arc<dyn KeyValueStore>,
        config: SchedulerConfig,
    ) -> (Arc<Self>, TokioHostScheduler) {
        let host = TokioHostScheduler::new(
            config.execution_budget,
            Some(Arc::clone(orchestrator.network())),
        );
        let scheduler = Arc::new(Self::new(
            orchestrator,
            Arc::new(host.clone()),
            store,
            config,
        ));
        let handler: Arc<dyn JobHandler> = scheduler.clone();
        host.attach(&handler);
        (scheduler, host)
    }

    /// Submits every enabled job.
    ///
    /// # Errors
    ///
    /// Returns the first storage or host error.
    pub fn register(&self) -> SyncResult<()> {
        let now = Timestamp::now();
        for (kind, record) in self.jobs.all()? {
            if record.enabled {
                self.host.submit(self.next_request(kind, now))?;
                info!(%kind, "job registered");
            } else {
                debug!(%kind, "job disabled, not registered");
            }
        }
        Ok(())
    }

    /// Enables or disables a job, submitting or cancelling it.
    ///
    /// # Errors
    ///
    /// Returns a storage or host error.
    pub fn set_enabled(&self, kind: JobKind, enabled: bool) -> SyncResult<JobRecord> {
        let record = self.jobs.update(kind, |record| record.enabled = enabled)?;
        if enabled {
            self.host.submit(self.next_request(kind, Timestamp::now()))?;
        } else {
            self.host.cancel(kind);
        }
        info!(%kind, enabled, "job toggled");
        Ok(record)
    }

    /// Persisted record of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read.
    pub fn job_record(&self, kind: JobKind) -> SyncResult<JobRecord> {
        self.jobs.load(kind)
    }

    /// The job store.
    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// First maintenance window start strictly after `now`.
    pub fn next_maintenance_window(&self, now: Timestamp) -> Timestamp {
        let offset = (self.config.maintenance_window_start.as_millis() as i64).rem_euclid(DAY_MS);
        let now_ms = now.as_millis();
        let mut candidate = now_ms - now_ms.rem_euclid(DAY_MS) + offset;
        if candidate <= now_ms {
            candidate += DAY_MS;
        }
        Timestamp::from_millis(candidate)
    }

    /// Next occurrence of `kind` after `now`.
    pub fn next_request(&self, kind: JobKind, now: Timestamp) -> JobRequest {
        match kind {
            JobKind::Refresh => JobRequest {
                kind,
                earliest_start: now.plus(self.config.refresh_interval),
                requires_network: false,
                requires_power: false,
            },
            JobKind::Maintenance => JobRequest {
                kind,
                earliest_start: self.next_maintenance_window(now),
                requires_network: true,
                requires_power: self.config.maintenance_requires_power,
            },
        }
    }

    /// Runs one invocation of `kind`.
    ///
    /// Resubmits the next occurrence first, then runs a sync cycle that is
    /// cancelled when `expiration` fires, then persists the outcome.
    pub async fn handle_invocation(&self, kind: JobKind, expiration: CancelToken) -> JobOutcome {
        let started = Timestamp::now();
        let record = match self.jobs.load(kind) {
            Ok(record) => record,
            Err(err) => {
                warn!(%kind, error = %err, "job record unreadable, using defaults");
                JobRecord::default()
            }
        };
        if !record.enabled {
            info!(%kind, "job disabled, skipping invocation");
            return JobOutcome::Disabled;
        }

        if let Err(err) = self.host.submit(self.next_request(kind, started)) {
            error!(%kind, error = %err, "could not resubmit job");
        }

        info!(%kind, "background job started");
        let outcome = match self.orchestrator.sync_now_with(&expiration).await {
            Ok(report) => JobOutcome::Completed {
                uploaded: report.uploaded,
            },
            Err(SyncError::Cancelled) if expiration.is_cancelled() => JobOutcome::Expired,
            Err(err) => JobOutcome::Failed(err.to_string()),
        };

        let persisted = self.jobs.update(kind, |record| {
            record.last_run = Some(started);
            record.run_count += 1;
            match &outcome {
                JobOutcome::Completed { .. } => {
                    record.success_count += 1;
                    record.last_outcome = Some(RunOutcome::Success);
                    record.last_error = None;
                }
                JobOutcome::Failed(message) => {
                    record.failure_count += 1;
                    record.last_outcome = Some(RunOutcome::Failure);
                    record.last_error = Some(message.clone());
                }
                JobOutcome::Expired => {
                    record.failure_count += 1;
                    record.last_outcome = Some(RunOutcome::Expired);
                    record.last_error = Some("execution budget expired".into());
                }
                JobOutcome::Disabled => {}
            }
        });
        if let Err(err) = persisted {
            warn!(%kind, error = %err, "could not persist job outcome");
        }
        info!(%kind, ?outcome, "background job finished");
        outcome
    }
}

#[async_trait]
impl JobHandler for BackgroundScheduler {
    async fn run_job(&self, kind: JobKind, expiration: CancelToken) -> JobOutcome {
        self.handle_invocation(kind, expiration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::config::SyncConfiguration;
    use crate::local::MemoryLocalStore;
    use crate::network::{ConnectionKind, ManualPathMonitor, NetworkStatus};
    use crate::remote::MemoryRemoteStore;
    use offsync_protocol::{ChangeOperation, Document, Record};
    use offsync_storage::InMemoryStore;

    #[derive(Default)]
    struct RecordingHost {
        submitted: Mutex<Vec<JobRequest>>,
        cancelled: Mutex<Vec<JobKind>>,
    }

    impl HostScheduler for RecordingHost {
        fn submit(&self, request: JobRequest) -> SyncResult<()> {
            self.submitted.lock().push(request);
            Ok(())
        }

        fn cancel(&self, kind: JobKind) {
            self.cancelled.lock().push(kind);
        }
    }

    struct Fixture {
        scheduler: BackgroundScheduler,
        host: Arc<RecordingHost>,
        remote: Arc<MemoryRemoteStore>,
        orchestrator: SyncOrchestrator,
        store: Arc<InMemoryStore>,
    }

    fn fixture(config: SchedulerConfig) -> Fixture {
        let remote = Arc::new(MemoryRemoteStore::new());
        let path = Arc::new(ManualPathMonitor::new(NetworkStatus::connected(
            ConnectionKind::Wired,
        )));
        let network = Arc::new(NetworkMonitor::new(path));
        network.start();
        let orchestrator = SyncOrchestrator::builder(
            remote.clone(),
            Arc::new(MemoryLocalStore::new()),
            Arc::new(StaticAuth::signed_in("u1")),
            network,
        )
        .configuration(SyncConfiguration::new().with_max_retry_attempts(2))
        .build();
        let host = Arc::new(RecordingHost::default());
        let store = Arc::new(InMemoryStore::new());
        let scheduler =
            BackgroundScheduler::new(orchestrator.clone(), host.clone(), store.clone(), config);
        Fixture {
            scheduler,
            host,
            remote,
            orchestrator,
            store,
        }
    }

    fn queue_one(orchestrator: &SyncOrchestrator) {
        let mut record = Record::with_id("b1", "budgets".into(), Document::new());
        orchestrator
            .record_change(&mut record, ChangeOperation::Create)
            .unwrap();
    }

    #[test]
    fn job_kind_names() {
        assert_eq!("refresh".parse::<JobKind>().unwrap(), JobKind::Refresh);
        assert_eq!(JobKind::Maintenance.to_string(), "maintenance");
        assert!("hourly".parse::<JobKind>().is_err());
    }

    #[test]
    fn maintenance_window_is_next_occurrence() {
        let f = fixture(SchedulerConfig::new());
        let day = DAY_MS;
        let two_am = 2 * 3_600_000;

        let before = Timestamp::from_millis(10 * day + 3_600_000);
        assert_eq!(
            f.scheduler.next_maintenance_window(before),
            Timestamp::from_millis(10 * day + two_am)
        );
        let at = Timestamp::from_millis(10 * day + two_am);
        assert_eq!(
            f.scheduler.next_maintenance_window(at),
            Timestamp::from_millis(11 * day + two_am)
        );
    }

    #[test]
    fn register_submits_enabled_jobs() {
        let f = fixture(SchedulerConfig::new());
        f.scheduler.jobs().update(JobKind::Maintenance, |r| r.enabled = false).unwrap();

        f.scheduler.register().unwrap();
        let submitted = f.host.submitted.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].kind, JobKind::Refresh);
        assert!(!submitted[0].requires_network);
    }

    #[tokio::test]
    async fn invocation_resubmits_then_records_success() {
        let f = fixture(SchedulerConfig::new());
        queue_one(&f.orchestrator);

        let outcome = f
            .scheduler
            .handle_invocation(JobKind::Maintenance, CancelToken::new())
            .await;
        assert_eq!(outcome, JobOutcome::Completed { uploaded: 1 });

        let submitted = f.host.submitted.lock().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].kind, JobKind::Maintenance);
        assert!(submitted[0].requires_network);
        assert!(submitted[0].requires_power);

        let record = f.scheduler.job_record(JobKind::Maintenance).unwrap();
        assert_eq!(record.run_count, 1);
        assert_eq!(record.success_count, 1);
        assert_eq!(record.last_outcome, Some(RunOutcome::Success));
        assert!(record.last_run.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_recorded_not_propagated() {
        let f = fixture(SchedulerConfig::new());
        queue_one(&f.orchestrator);
        f.remote
            .set_fail_always(Some(SyncError::commit_retryable("unavailable")));

        let outcome = f
            .scheduler
            .handle_invocation(JobKind::Refresh, CancelToken::new())
            .await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));

        let record = f.scheduler.job_record(JobKind::Refresh).unwrap();
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.last_outcome, Some(RunOutcome::Failure));
        assert!(record.last_error.unwrap().contains("max retries"));
        // Still rescheduled.
        assert_eq!(f.host.submitted.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiration_cancels_cycle() {
        let f = fixture(SchedulerConfig::new());
        queue_one(&f.orchestrator);
        f.remote
            .set_fail_always(Some(SyncError::commit_retryable("slow")));
        f.orchestrator.set_configuration(
            SyncConfiguration::new()
                .with_max_retry_attempts(10)
                .with_base_retry_delay(Duration::from_secs(20)),
        );

        let expiration = CancelToken::new();
        let timer = {
            let expiration = expiration.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                expiration.cancel();
            })
        };
        let outcome = f
            .scheduler
            .handle_invocation(JobKind::Refresh, expiration)
            .await;
        timer.await.unwrap();
        assert_eq!(outcome, JobOutcome::Expired);
        assert_eq!(f.orchestrator.pending_changes_count(), 1);

        let record = f.scheduler.job_record(JobKind::Refresh).unwrap();
        assert_eq!(record.last_outcome, Some(RunOutcome::Expired));
    }

    #[tokio::test]
    async fn disabled_job_does_nothing() {
        let f = fixture(SchedulerConfig::new());
        f.scheduler.set_enabled(JobKind::Refresh, false).unwrap();
        assert_eq!(f.host.cancelled.lock().clone(), vec![JobKind::Refresh]);

        let outcome = f
            .scheduler
            .handle_invocation(JobKind::Refresh, CancelToken::new())
            .await;
        assert_eq!(outcome, JobOutcome::Disabled);
        assert!(f.host.submitted.lock().is_empty());
        assert_eq!(f.scheduler.job_record(JobKind::Refresh).unwrap().run_count, 0);
    }

    #[test]
    fn records_survive_new_scheduler() {
        let f = fixture(SchedulerConfig::new());
        f.scheduler
            .jobs()
            .update(JobKind::Refresh, |r| r.run_count = 7)
            .unwrap();

        let again = JobStore::new(f.store.clone());
        assert_eq!(again.load(JobKind::Refresh).unwrap().run_count, 7);

        let reset = again.reset(JobKind::Refresh).unwrap();
        assert_eq!(reset.run_count, 0);
        assert!(reset.enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_host_fires_and_reschedules() {
        let f = fixture(SchedulerConfig::new().with_refresh_interval(Duration::from_secs(60)));
        let (scheduler, host) = BackgroundScheduler::with_tokio_host(
            f.orchestrator.clone(),
            f.store.clone(),
            SchedulerConfig::new().with_refresh_interval(Duration::from_secs(60)),
        );
        scheduler.jobs().update(JobKind::Maintenance, |r| r.enabled = false).unwrap();
        scheduler.register().unwrap();
        assert!(host.pending(JobKind::Refresh).is_some());
        assert!(host.pending(JobKind::Maintenance).is_none());

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        let record = scheduler.job_record(JobKind::Refresh).unwrap();
        assert_eq!(record.run_count, 1);
        // Resubmitted by the invocation itself.
        assert!(host.pending(JobKind::Refresh).is_some());

        host.cancel(JobKind::Refresh);
        assert!(host.pending(JobKind::Refresh).is_none());
    }
}
