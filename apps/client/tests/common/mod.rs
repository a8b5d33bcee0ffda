#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use resume_client::api::{JobApi, ResultFetch};
use resume_client::clock::ManualClock;
use resume_client::errors::ApiError;
use resume_client::models::{GenerationInput, GenerationResult, JobStatus, StatusPayload, Template};
use resume_client::session::CreditRefresher;
use resume_client::store::MemoryStore;
use resume_client::{GenerationTracker, PollPolicy, TrackerDeps};

pub const START_MS: i64 = 1_700_000_000_000;

/// Scripted backend reply. The last reply of a queue repeats forever.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    NotFound,
    Fail(u16, &'static str),
}

impl<T: Clone> Reply<T> {
    fn into_result(self) -> Result<T, ApiError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::NotFound => Err(ApiError::NotFound("not found".to_string())),
            Reply::Fail(status, message) => Err(ApiError::Api {
                status,
                message: message.to_string(),
            }),
        }
    }
}

fn next<T: Clone>(queue: &Mutex<VecDeque<Reply<T>>>) -> Reply<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front().unwrap()
    } else {
        queue
            .front()
            .cloned()
            .unwrap_or(Reply::Fail(500, "no scripted reply"))
    }
}

#[derive(Default)]
pub struct FakeJobApi {
    pub job_ids: Mutex<VecDeque<Reply<String>>>,
    pub statuses: Mutex<VecDeque<Reply<StatusPayload>>>,
    pub results: Mutex<VecDeque<Reply<ResultFetch>>>,
    pub create_delay: Mutex<Duration>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub updates: Mutex<Vec<(String, String)>>,
}

impl FakeJobApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_job_id(&self, reply: Reply<String>) {
        self.job_ids.lock().unwrap().push_back(reply);
    }

    pub fn push_status(&self, reply: Reply<StatusPayload>) {
        self.statuses.lock().unwrap().push_back(reply);
    }

    pub fn push_result(&self, reply: Reply<ResultFetch>) {
        self.results.lock().unwrap().push_back(reply);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn create(&self, _input: &GenerationInput) -> Result<String, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .job_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Ok("job-1".to_string()));
        reply.into_result()
    }

    async fn get_status(&self, _job_id: &str) -> Result<StatusPayload, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.statuses).into_result()
    }

    async fn get_result(&self, _job_id: &str) -> Result<ResultFetch, ApiError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.results).into_result()
    }

    async fn update_content(&self, resume_id: &str, content: &str) -> Result<(), ApiError> {
        self.updates
            .lock()
            .unwrap()
            .push((resume_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn list_templates(&self) -> Result<Vec<Template>, ApiError> {
        Ok(vec![])
    }
}

#[derive(Default)]
pub struct CountingCredits {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl CountingCredits {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CreditRefresher for CountingCredits {
    async fn refresh_credits(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ApiError::Unauthorized);
        }
        Ok(())
    }
}

pub struct Harness {
    pub tracker: GenerationTracker,
    pub api: Arc<FakeJobApi>,
    pub credits: Arc<CountingCredits>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(PollPolicy::default(), CountingCredits::default(), MemoryStore::new())
}

pub fn harness_with(policy: PollPolicy, credits: CountingCredits, store: MemoryStore) -> Harness {
    let api = FakeJobApi::new();
    let credits = Arc::new(credits);
    let store = Arc::new(store);
    let clock = Arc::new(ManualClock::new(START_MS));

    let tracker = GenerationTracker::new(
        TrackerDeps {
            api: api.clone(),
            credits: credits.clone(),
            store: store.clone(),
            clock: clock.clone(),
        },
        policy,
        "test-session",
    );

    Harness {
        tracker,
        api,
        credits,
        store,
        clock,
    }
}

pub fn input() -> GenerationInput {
    GenerationInput {
        document: bytes::Bytes::from_static(b"Backend engineer, Rust, Postgres"),
        file_name: "jd.txt".to_string(),
        company_name: "Acme".to_string(),
        job_title: "Backend Engineer".to_string(),
        skills: vec!["rust".to_string()],
        template_id: None,
    }
}

pub fn status(status: JobStatus, progress: f64) -> Reply<StatusPayload> {
    Reply::Ok(StatusPayload::new(status, progress).with_step(status.as_str()))
}

pub fn ready(job_id: &str, content: &str) -> Reply<ResultFetch> {
    Reply::Ok(ResultFetch::Ready(GenerationResult {
        job_id: job_id.to_string(),
        company_name: Some("Acme".to_string()),
        job_title: Some("Backend Engineer".to_string()),
        content: content.to_string(),
        agent_outputs: None,
        analysis_summary: None,
        token_usage: None,
        total_usage: None,
        template_id: None,
        message: Some("Resume generated".to_string()),
    }))
}

/// Advances paused tokio time, letting spawned timer tasks run.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
