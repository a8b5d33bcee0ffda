//! Generation Tracker: lifecycle of one asynchronous resume-generation job.
//!
//! Flow: submit → status poll every `interval` → result fetch once the
//!       backend reports `completed` → credit refresh → timers stopped.
//!
//! Two timer tasks run while a job is tracked: the elapsed-time tick and the
//! status poll loop. Both hold a `Weak` reference to the tracker and an epoch
//! number. Dropping the last tracker handle ends them, and any stop, reset or
//! new submission bumps the epoch so a stale task can no longer mutate state.
//!
//! Status transitions come only from poll responses. The only local
//! transition is the `idle` status set on submission.

use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{JobApi, ResultFetch};
use crate::clock::Clock;
use crate::errors::{ApiError, TrackerError};
use crate::models::{GenerationInput, GenerationResult, GenerationStatus, JobStatus};
use crate::session::CreditRefresher;
use crate::store::{load_json, save_json, tracker_key, StateStore};

pub mod format;
pub mod policy;
pub mod state;

pub use format::format_elapsed;
pub use policy::PollPolicy;
pub use state::{TrackerState, TrackerView, SNAPSHOT_VERSION};

/// Collaborators injected into the tracker.
pub struct TrackerDeps {
    pub api: Arc<dyn JobApi>,
    pub credits: Arc<dyn CreditRefresher>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<dyn Clock>,
}

/// Session-scoped handle to the generation tracker. Cheap to clone.
#[derive(Clone)]
pub struct GenerationTracker {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn JobApi>,
    credits: Arc<dyn CreditRefresher>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    storage_key: String,
    state: Mutex<TrackerState>,
    timers: std::sync::Mutex<Timers>,
}

#[derive(Default)]
struct Timers {
    tick: Option<JoinHandle<()>>,
    poll: Option<JoinHandle<()>>,
}

impl Timers {
    fn abort_all(&mut self) {
        for handle in [self.tick.take(), self.poll.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

impl GenerationTracker {
    pub fn new(deps: TrackerDeps, policy: PollPolicy, session_id: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                api: deps.api,
                credits: deps.credits,
                store: deps.store,
                clock: deps.clock,
                policy,
                storage_key: tracker_key(session_id),
                state: Mutex::new(TrackerState::default()),
                timers: std::sync::Mutex::new(Timers::default()),
            }),
        }
    }

    /// Starts a new generation job, replacing whatever was tracked before.
    /// Returns the server-assigned job id.
    pub async fn submit(&self, input: GenerationInput) -> Result<String, TrackerError> {
        input.validate()?;
        let inner = &self.inner;

        let epoch = {
            let mut state = inner.state.lock().await;
            state.clear();
            state.status = Some(GenerationStatus::initial(inner.clock.now_ms()));
            state.company_name = Some(input.company_name.clone());
            state.job_title = Some(input.job_title.clone());
            inner.persist(&state).await;
            state.epoch
        };
        inner.abort_timers();
        inner.start_tick(epoch);

        let submission = Uuid::new_v4();
        info!(
            %submission,
            "Submitting generation job: {} at {}",
            input.job_title, input.company_name
        );
        let created = inner.api.create(&input).await;

        let mut state = inner.state.lock().await;
        if state.epoch != epoch {
            return Err(TrackerError::Superseded);
        }

        match created {
            Ok(job_id) => {
                state.job_id = Some(job_id.clone());
                state.error = None;
                state.is_polling = true;
                inner.persist(&state).await;
                drop(state);

                inner.start_polling(epoch);
                info!(%submission, "Generation job {job_id} started");
                Ok(job_id)
            }
            Err(e) => {
                let err = TrackerError::Submission(e.detail());
                error!("{err}");
                state.error = Some(err.to_string());
                inner.persist(&state).await;
                drop(state);

                inner.abort_timers();
                Err(err)
            }
        }
    }

    /// Runs one poll cycle: fetches the status and, once the job is
    /// completed, its result.
    pub async fn poll_status(&self) -> Result<GenerationStatus, TrackerError> {
        let epoch = self.inner.state.lock().await.epoch;
        self.inner.poll_cycle(epoch).await
    }

    /// Fetches the result of the active job. `Ok(None)` means not ready yet.
    pub async fn fetch_result(&self) -> Result<Option<GenerationResult>, TrackerError> {
        let epoch = self.inner.state.lock().await.epoch;
        self.inner.fetch_result_at(epoch).await
    }

    /// Cancels both timers. Idempotent.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        state.epoch += 1;
        state.is_polling = false;
        drop(state);
        self.inner.abort_timers();
    }

    /// Stops tracking and forgets the job, including its persisted snapshot.
    pub async fn reset(&self) -> Result<(), TrackerError> {
        self.inner.state.lock().await.clear();
        self.inner.abort_timers();
        self.inner.store.remove(&self.inner.storage_key).await?;
        info!("Generation state reset");
        Ok(())
    }

    /// Loads the persisted snapshot without starting any timer.
    /// Returns whether a usable snapshot was found.
    pub async fn load(&self) -> Result<bool, TrackerError> {
        let snapshot: Option<TrackerState> =
            load_json(self.inner.store.as_ref(), &self.inner.storage_key).await?;
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                "Discarding tracker snapshot with unsupported version {}",
                snapshot.version
            );
            return Ok(false);
        }

        self.inner.state.lock().await.load(snapshot);
        self.inner.abort_timers();
        Ok(true)
    }

    /// Reload recovery: loads the persisted snapshot and, if its job is still
    /// in flight, restarts the elapsed tick and polling. Returns whether
    /// tracking was resumed.
    pub async fn restore(&self) -> Result<bool, TrackerError> {
        if !self.load().await? {
            return Ok(false);
        }

        let now = self.inner.clock.now_ms();
        let mut state = self.inner.state.lock().await;

        // A completed job whose result never arrived still needs polling.
        let resumable = state.job_id.is_some()
            && !state.halted
            && match state.job_status() {
                Some(JobStatus::Completed) => state.result.is_none(),
                Some(status) => !status.is_terminal(),
                None => false,
            };
        if !resumable {
            return Ok(false);
        }

        let ticking = !state.is_terminal();
        if ticking {
            state.refresh_elapsed(now);
        }
        state.is_polling = true;
        let epoch = state.epoch;
        info!(
            "Restored generation state for job {} with elapsed time: {:.1}s",
            state.job_id.as_deref().unwrap_or_default(),
            state.elapsed_time
        );
        drop(state);

        if ticking {
            self.inner.start_tick(epoch);
        }
        self.inner.start_polling(epoch);
        Ok(true)
    }

    /// Replaces the generated content locally and saves it to the backend.
    /// `resume_id` defaults to the tracked job id.
    pub async fn update_resume_content(
        &self,
        content: &str,
        resume_id: Option<&str>,
    ) -> Result<(), TrackerError> {
        let target = {
            let mut state = self.inner.state.lock().await;
            if state.result.is_none() && resume_id.is_none() {
                return Ok(());
            }
            if let Some(result) = state.result.as_mut() {
                result.content = content.to_string();
            }
            self.inner.persist(&state).await;
            resume_id.map(str::to_string).or_else(|| state.job_id.clone())
        };

        if let Some(id) = target {
            self.inner
                .api
                .update_content(&id, content)
                .await
                .map_err(|e| {
                    let err = TrackerError::ContentUpdate(e.detail());
                    error!("Error saving resume content: {err}");
                    err
                })?;
        }
        Ok(())
    }

    pub async fn view(&self) -> TrackerView {
        self.inner.state.lock().await.view()
    }

    pub async fn result(&self) -> Option<GenerationResult> {
        self.inner.state.lock().await.result.clone()
    }

    pub async fn job_id(&self) -> Option<String> {
        self.inner.state.lock().await.job_id.clone()
    }
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_timers(&self) {
        self.timers().abort_all();
    }

    fn abort_tick(&self) {
        if let Some(handle) = self.timers().tick.take() {
            handle.abort();
        }
    }

    fn start_tick(self: &Arc<Self>, epoch: u64) {
        let period = self.policy.tick.max(Duration::from_millis(1));
        let handle = tokio::spawn(run_tick_loop(Arc::downgrade(self), epoch, period));
        if let Some(previous) = self.timers().tick.replace(handle) {
            previous.abort();
        }
    }

    fn start_polling(self: &Arc<Self>, epoch: u64) {
        let handle = tokio::spawn(run_poll_loop(
            Arc::downgrade(self),
            epoch,
            self.policy.clone(),
        ));
        if let Some(previous) = self.timers().poll.replace(handle) {
            previous.abort();
        }
    }

    async fn persist(&self, state: &TrackerState) {
        if let Err(e) = save_json(self.store.as_ref(), &self.storage_key, &state.snapshot()).await
        {
            warn!("Failed to persist generation state: {e}");
        }
    }

    async fn active_job(&self, epoch: u64) -> Result<String, TrackerError> {
        let state = self.state.lock().await;
        if state.epoch != epoch {
            return Err(TrackerError::Superseded);
        }
        state.job_id.clone().ok_or(TrackerError::NoActiveJob)
    }

    async fn poll_cycle(&self, epoch: u64) -> Result<GenerationStatus, TrackerError> {
        let status = self.poll_status_at(epoch).await?;

        if status.status == JobStatus::Completed {
            let has_result = self.state.lock().await.result.is_some();
            if has_result || self.fetch_result_at(epoch).await?.is_some() {
                self.finish(epoch).await;
            }
        }
        Ok(status)
    }

    async fn poll_status_at(&self, epoch: u64) -> Result<GenerationStatus, TrackerError> {
        let job_id = self.active_job(epoch).await?;
        let outcome = self.api.get_status(&job_id).await;
        let now = self.clock.now_ms();

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return Err(TrackerError::Superseded);
        }

        match outcome {
            Ok(payload) => {
                let was_terminal = state.is_terminal();
                let current = state
                    .status
                    .get_or_insert_with(|| GenerationStatus::initial(now));
                current.merge(payload);
                let status = current.clone();
                debug!(
                    "Job {job_id}: {} {:.0}% ({})",
                    status.status, status.progress, status.current_step
                );

                state.error = None;
                // While the result is outstanding the streak belongs to the
                // result fetch and is only cleared by its outcome.
                let awaiting_result =
                    status.status == JobStatus::Completed && state.result.is_none();
                if !awaiting_result {
                    state.consecutive_failures = 0;
                }
                let terminal = status.status.is_terminal();
                let failed = status.status == JobStatus::Failed;
                if terminal && !was_terminal {
                    state.refresh_elapsed(now);
                }
                if failed {
                    state.is_polling = false;
                }
                self.persist(&state).await;
                drop(state);

                if failed {
                    warn!("Generation job {job_id} failed: {}", status.current_step);
                    self.abort_timers();
                } else if terminal {
                    self.abort_tick();
                }
                Ok(status)
            }
            Err(ApiError::NotFound(_)) => {
                let err = TrackerError::JobExpired;
                warn!("Job {job_id}: {err}");
                halt(&mut state, now, &err);
                self.persist(&state).await;
                drop(state);

                self.abort_timers();
                Err(err)
            }
            Err(e) => {
                let err = TrackerError::Status(e.detail());
                state.consecutive_failures += 1;
                warn!(
                    "Status check {} for job {job_id} failed: {err}",
                    state.consecutive_failures
                );
                state.error = Some(err.to_string());
                self.persist(&state).await;
                Err(err)
            }
        }
    }

    async fn fetch_result_at(&self, epoch: u64) -> Result<Option<GenerationResult>, TrackerError> {
        let job_id = self.active_job(epoch).await?;
        let outcome = self.api.get_result(&job_id).await;
        let now = self.clock.now_ms();

        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return Err(TrackerError::Superseded);
        }

        match outcome {
            Ok(ResultFetch::Ready(result)) => {
                let fresh = state.result.is_none();
                if fresh {
                    state.result = Some(result);
                }
                state.error = None;
                state.consecutive_failures = 0;
                let result = state.result.clone();
                self.persist(&state).await;
                drop(state);

                if fresh {
                    info!("Generation result received for job {job_id}");
                    self.refresh_credits().await;
                }
                Ok(result)
            }
            Ok(ResultFetch::Pending) => {
                debug!("Result for job {job_id} not ready yet");
                state.consecutive_failures = 0;
                Ok(None)
            }
            Err(ApiError::NotFound(_)) => {
                let err = TrackerError::ResultExpired;
                warn!("Job {job_id}: {err}");
                halt(&mut state, now, &err);
                self.persist(&state).await;
                drop(state);

                self.abort_timers();
                Err(err)
            }
            Err(e) => {
                let err = TrackerError::ResultFetch(e.detail());
                state.consecutive_failures += 1;
                warn!("Result fetch for job {job_id} failed: {err}");
                state.error = Some(err.to_string());
                self.persist(&state).await;
                Err(err)
            }
        }
    }

    /// Credit refresh failures never reach the job state.
    async fn refresh_credits(&self) {
        match self.credits.refresh_credits().await {
            Ok(()) => info!("Credits updated after resume generation"),
            Err(e) => warn!("{}", TrackerError::CreditRefresh(e.detail())),
        }
    }

    async fn finish(&self, epoch: u64) {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return;
        }
        state.is_polling = false;
        drop(state);

        self.abort_timers();
        info!("Generation tracking finished");
    }

    async fn give_up(&self, epoch: u64, failures: u32) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return;
        }

        let reason = format!("giving up after {failures} consecutive failed checks");
        let err = if state.job_status() == Some(JobStatus::Completed) && state.result.is_none() {
            TrackerError::ResultFetch(reason)
        } else {
            TrackerError::Status(reason)
        };
        error!("{err}");
        halt(&mut state, now, &err);
        self.persist(&state).await;
        drop(state);

        self.abort_timers();
    }

    async fn failures_at(&self, epoch: u64) -> Option<u32> {
        let state = self.state.lock().await;
        (state.epoch == epoch).then_some(state.consecutive_failures)
    }

    async fn is_polling_at(&self, epoch: u64) -> bool {
        let state = self.state.lock().await;
        state.epoch == epoch && state.is_polling
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.timers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
    }
}

/// Marks tracking as stopped on a persistent error and freezes elapsed time.
/// Elapsed time of a job already at terminal status stays where it froze.
fn halt(state: &mut TrackerState, now_ms: i64, err: &TrackerError) {
    state.error = Some(err.to_string());
    state.halted = true;
    state.is_polling = false;
    if !state.is_terminal() {
        state.refresh_elapsed(now_ms);
    }
}

async fn run_tick_loop(tracker: Weak<Inner>, epoch: u64, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = tracker.upgrade() else {
            break;
        };
        let now = inner.clock.now_ms();
        let mut state = inner.state.lock().await;
        if state.epoch != epoch || state.halted || state.is_terminal() {
            break;
        }
        state.refresh_elapsed(now);
    }
}

async fn run_poll_loop(tracker: Weak<Inner>, epoch: u64, policy: PollPolicy) {
    let mut delay = policy.delay_after(0);

    loop {
        tokio::time::sleep(delay).await;
        let Some(inner) = tracker.upgrade() else {
            break;
        };

        match inner.poll_cycle(epoch).await {
            Ok(_) => {
                if !inner.is_polling_at(epoch).await {
                    break;
                }
                delay = policy.delay_after(0);
            }
            Err(err) if err.is_terminal() => {
                debug!("Polling stopped: {err}");
                break;
            }
            Err(_) => {
                let Some(failures) = inner.failures_at(epoch).await else {
                    break;
                };
                if policy.should_give_up(failures) {
                    inner.give_up(epoch, failures).await;
                    break;
                }
                delay = policy.delay_after(failures);
                debug!("Next status check in {}ms", delay.as_millis());
            }
        }
    }
}
