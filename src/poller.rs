//! Submit-then-poll driver for lookup jobs.
//!
//! [`TaskPollingClient::submit`] creates the backend task and hands back a
//! [`JobHandle`]. On success the handle owns exactly one tokio task that
//! sleeps, polls, and repeats until the job completes, fails, or is
//! cancelled. Observers follow the job through a `watch` channel.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::api::{
    CredentialProvider, LookupApiClient, LookupRequest, LookupResult, PollReply, TaskBackend,
    TaskId,
};
use crate::error::CarscanError;
use crate::state_machine::{Job, JobEvent, JobState, PollConfig, StateMachine, Transition};

/// What a single poll did to the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Backend reported progress; polling continues.
    Pending(String),
    /// Backend returned the result; the job is completed.
    Finished(LookupResult),
    /// The poll failed; recorded, polling continues.
    Transient(String),
    /// The poll cutoff was reached; the job failed.
    TimedOut { attempts: u32 },
    /// No poll was issued, or its reply arrived after the job settled.
    Skipped,
}

/// State shared between a [`JobHandle`] and its polling task.
struct JobCell {
    job: watch::Sender<Job>,
    /// Serializes polls so at most one is in flight per job.
    turn: Mutex<()>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl JobCell {
    fn new(job: Job) -> Self {
        let (job, _) = watch::channel(job);
        Self {
            job,
            turn: Mutex::new(()),
            task: StdMutex::new(None),
        }
    }

    /// Apply an event and notify subscribers if anything changed.
    fn apply(&self, event: JobEvent) -> Transition {
        let mut transition = Transition::Ignored;
        self.job.send_if_modified(|job| {
            transition = StateMachine::apply(job, event);
            transition != Transition::Ignored
        });
        transition
    }

    fn snapshot(&self) -> Job {
        self.job.borrow().clone()
    }

    fn is_settled(&self) -> bool {
        self.job.borrow().is_settled()
    }

    /// Task id, if the job is in a state where polling makes sense.
    fn pollable_task_id(&self) -> Option<TaskId> {
        let job = self.job.borrow();
        match job.state {
            JobState::Polling if !job.cancelled => job.task_id.clone(),
            _ => None,
        }
    }

    fn set_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
    }

    /// Abort the polling task. The handle is taken, so this happens once.
    fn stop_task(&self) {
        let handle = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Caller's view of one submitted job.
///
/// Dropping the handle stops its polling task, the way closing the view
/// that started a lookup abandons it.
pub struct JobHandle {
    cell: Arc<JobCell>,
}

impl JobHandle {
    /// Current snapshot of the job.
    pub fn snapshot(&self) -> Job {
        self.cell.snapshot()
    }

    pub fn state(&self) -> JobState {
        self.cell.job.borrow().state
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.cell.job.subscribe()
    }

    /// Wait until the job is terminal or cancelled.
    pub async fn wait(&self) -> Job {
        let mut rx = self.subscribe();
        match rx.wait_for(Job::is_settled).await {
            Ok(job) => job.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Stop polling and abandon the job. Safe to call in any state and any
    /// number of times; a terminal job is left untouched.
    pub fn cancel(&self) {
        let transition = self.cell.apply(JobEvent::Cancelled);
        self.cell.stop_task();
        if transition != Transition::Ignored {
            let job = self.cell.job.borrow();
            info!(handle = %job.handle_id, task_id = ?job.task_id, "lookup cancelled");
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.cell.stop_task();
    }
}

/// Submits lookups and drives each one to a final outcome.
pub struct TaskPollingClient<B: TaskBackend> {
    backend: Arc<B>,
    config: PollConfig,
}

impl TaskPollingClient<LookupApiClient> {
    /// HTTP-backed client for the lookup API at `api_base`.
    pub fn http(
        api_base: String,
        credentials: Arc<dyn CredentialProvider>,
        config: PollConfig,
    ) -> Result<Self, CarscanError> {
        let backend = LookupApiClient::with_base_url(api_base, credentials)?;
        Self::new(backend, config)
    }
}

impl<B: TaskBackend> TaskPollingClient<B> {
    pub fn new(backend: B, config: PollConfig) -> Result<Self, CarscanError> {
        config.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            config,
        })
    }

    /// Submit a lookup. On success polling starts in the background; on
    /// failure the returned job is already `Failed` and nothing is scheduled.
    pub async fn submit(&self, request: LookupRequest) -> JobHandle {
        let cell = Arc::new(JobCell::new(Job::new(
            request.identifier.clone(),
            self.config.max_polls,
        )));
        cell.apply(JobEvent::SubmitStarted);

        let handle_id = cell.job.borrow().handle_id.clone();
        info!(handle = %handle_id, identifier = %request.identifier, "submitting lookup");

        match self.backend.create_task(&request).await {
            Ok(task_id) => {
                info!(handle = %handle_id, task_id = %task_id, "lookup accepted, polling");
                cell.apply(JobEvent::Submitted(task_id));
                let task = tokio::spawn(drive(
                    Arc::clone(&self.backend),
                    Arc::clone(&cell),
                    self.config.clone(),
                ));
                cell.set_task(task);
            }
            Err(e) => {
                error!(handle = %handle_id, error = %e, "lookup submission failed");
                cell.apply(JobEvent::SubmitFailed(e.to_string()));
            }
        }

        JobHandle { cell }
    }

    /// Poll once, outside the background schedule. Waits for any poll
    /// already in flight for this job.
    pub async fn poll(&self, job: &JobHandle) -> PollOutcome {
        poll_once(self.backend.as_ref(), &job.cell).await
    }

    pub fn cancel(&self, job: &JobHandle) {
        job.cancel();
    }
}

async fn poll_once<B: TaskBackend>(backend: &B, cell: &JobCell) -> PollOutcome {
    let _turn = cell.turn.lock().await;

    let Some(task_id) = cell.pollable_task_id() else {
        return PollOutcome::Skipped;
    };

    let (event, provisional) = match backend.fetch_result(&task_id).await {
        Ok(PollReply::Finished(result)) => (
            JobEvent::PollFinished(result.clone()),
            PollOutcome::Finished(result),
        ),
        Ok(PollReply::Pending(message)) => {
            debug!(task_id = %task_id, %message, "lookup still running");
            (
                JobEvent::PollPending {
                    message: message.clone(),
                },
                PollOutcome::Pending(message),
            )
        }
        Err(e) => {
            let reason = e.to_string();
            warn!(task_id = %task_id, error = %reason, "poll failed, will retry");
            (JobEvent::PollFailed(reason.clone()), PollOutcome::Transient(reason))
        }
    };

    match cell.apply(event) {
        Transition::Ignored => {
            debug!(task_id = %task_id, "discarding reply for settled lookup");
            PollOutcome::Skipped
        }
        Transition::Complete(JobState::Failed) => {
            let attempts = cell.job.borrow().poll_count;
            error!(task_id = %task_id, attempts, "lookup gave no result before the cutoff");
            PollOutcome::TimedOut { attempts }
        }
        Transition::Complete(_) => {
            info!(task_id = %task_id, "lookup completed");
            provisional
        }
        Transition::Next(_) | Transition::Stay => provisional,
    }
}

/// The polling schedule: wait one interval, poll, repeat until settled.
async fn drive<B: TaskBackend>(backend: Arc<B>, cell: Arc<JobCell>, config: PollConfig) {
    let started = Instant::now();

    loop {
        sleep(config.interval).await;
        if cell.is_settled() {
            break;
        }

        if let Some(limit) = config.timeout
            && started.elapsed() >= limit
        {
            if cell.apply(JobEvent::DeadlineElapsed) != Transition::Ignored {
                error!(?limit, "lookup exceeded its polling deadline");
            }
            break;
        }

        poll_once(backend.as_ref(), &cell).await;
        if cell.is_settled() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, NoCredentials, StaticToken};
    use crate::state_machine::{ErrorKind, JobError};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TICK: Duration = Duration::from_millis(10);

    fn config(max_polls: u32) -> PollConfig {
        PollConfig::new(TICK, max_polls)
    }

    async fn settle(handle: &JobHandle) -> Job {
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("job did not settle in time")
    }

    /// Scripted backend: replies are handed out in order; once the script
    /// runs out every poll reports progress.
    struct ScriptedBackend {
        submit: StdMutex<Option<Result<TaskId, ApiError>>>,
        replies: StdMutex<VecDeque<Result<PollReply, ApiError>>>,
        polls: Arc<AtomicU32>,
        poll_delay: Duration,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<PollReply, ApiError>>) -> Self {
            Self {
                submit: StdMutex::new(Some(Ok(TaskId::from("abc")))),
                replies: StdMutex::new(replies.into()),
                polls: Arc::new(AtomicU32::new(0)),
                poll_delay: Duration::ZERO,
            }
        }

        fn rejecting(err: ApiError) -> Self {
            let backend = Self::new(Vec::new());
            *backend.submit.lock().unwrap() = Some(Err(err));
            backend
        }

        fn with_poll_delay(mut self, delay: Duration) -> Self {
            self.poll_delay = delay;
            self
        }

        fn poll_counter(&self) -> Arc<AtomicU32> {
            Arc::clone(&self.polls)
        }
    }

    impl TaskBackend for ScriptedBackend {
        async fn create_task(&self, _request: &LookupRequest) -> Result<TaskId, ApiError> {
            self.submit
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(TaskId::from("abc")))
        }

        async fn fetch_result(&self, _task_id: &TaskId) -> Result<PollReply, ApiError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.poll_delay.is_zero() {
                sleep(self.poll_delay).await;
            }
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(PollReply::Pending("in progress".into())))
        }
    }

    fn pending() -> Result<PollReply, ApiError> {
        Ok(PollReply::Pending("in progress".into()))
    }

    fn finished(text: &str) -> Result<PollReply, ApiError> {
        Ok(PollReply::Finished(LookupResult::Text(text.into())))
    }

    fn bad_body() -> Result<PollReply, ApiError> {
        Err(ApiError::Decode("expected value at line 1 column 1".into()))
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = TaskPollingClient::new(ScriptedBackend::new(Vec::new()), config(0));
        assert!(matches!(result, Err(CarscanError::Config(_))));
    }

    #[tokio::test]
    async fn submit_then_result_completes_and_stops_polling() {
        let backend = ScriptedBackend::new(vec![finished("clean title")]);
        let polls = backend.poll_counter();
        let client = TaskPollingClient::new(backend, config(10)).unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = settle(&handle).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(LookupResult::Text("clean title".into())));

        sleep(TICK * 5).await;
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_submission_never_polls() {
        let backend = ScriptedBackend::rejecting(ApiError::MissingTaskId { message: None });
        let polls = backend.poll_counter();
        let client = TaskPollingClient::new(backend, config(10)).unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = handle.snapshot();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().map(JobError::kind), Some(ErrorKind::SubmissionError));
        assert!(handle.cell.task.lock().unwrap().is_none());

        sleep(TICK * 5).await;
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert_eq!(client.poll(&handle).await, PollOutcome::Skipped);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failures_do_not_leave_polling() {
        let backend = ScriptedBackend::new(vec![
            bad_body(),
            bad_body(),
            bad_body(),
            bad_body(),
            bad_body(),
        ]);
        let client = TaskPollingClient::new(backend, config(50)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        let mut rx = handle.subscribe();
        let after_failures = rx
            .wait_for(|job| job.transient_failures == 5)
            .await
            .unwrap()
            .clone();
        assert_eq!(after_failures.state, JobState::Polling);
        assert!(after_failures.error.is_none());
        assert_eq!(
            after_failures.last_poll_error.as_ref().map(JobError::kind),
            Some(ErrorKind::TransientPollError)
        );

        handle.cancel();
        let job = settle(&handle).await;
        assert!(job.cancelled);
        assert_eq!(job.transient_failures, 5);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn result_after_transient_failures_completes() {
        let backend =
            ScriptedBackend::new(vec![bad_body(), bad_body(), finished("clean title")]);
        let client = TaskPollingClient::new(backend, config(10)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        let job = settle(&handle).await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.poll_count, 3);
        assert_eq!(job.transient_failures, 2);
    }

    /// Submits through the script, then polls a real HTTP client aimed at
    /// a port nobody listens on.
    struct RefusedPolls {
        http: LookupApiClient,
    }

    impl TaskBackend for RefusedPolls {
        async fn create_task(&self, _request: &LookupRequest) -> Result<TaskId, ApiError> {
            Ok(TaskId::from("abc"))
        }

        async fn fetch_result(&self, task_id: &TaskId) -> Result<PollReply, ApiError> {
            self.http.fetch(task_id).await
        }
    }

    #[tokio::test]
    async fn refused_connections_while_polling_are_transient() {
        let http = LookupApiClient::with_base_url(
            "http://127.0.0.1:9/api/parse/".into(),
            Arc::new(NoCredentials),
        )
        .unwrap();
        let client = TaskPollingClient::new(RefusedPolls { http }, config(50)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        let mut rx = handle.subscribe();
        let after_failures = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|job| job.transient_failures >= 5),
        )
        .await
        .expect("polls did not fail in time")
        .unwrap()
        .clone();
        assert_eq!(after_failures.state, JobState::Polling);
        assert!(after_failures.error.is_none());
        match &after_failures.last_poll_error {
            Some(JobError::TransientPoll(reason)) => {
                assert!(reason.starts_with("network error"), "got `{reason}`");
            }
            other => panic!("expected a transient poll error, got {other:?}"),
        }

        handle.cancel();
        let job = settle(&handle).await;
        assert!(job.cancelled);
        assert!(job.error.is_none());
    }

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct Captured(Arc<StdMutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn failed_poll_logs_a_retry_warning() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let backend = ScriptedBackend::new(vec![bad_body()]);
        let cfg = PollConfig::new(Duration::from_secs(60), 10);
        let client = TaskPollingClient::new(backend, cfg).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        assert!(matches!(client.poll(&handle).await, PollOutcome::Transient(_)));

        let text = logs.text();
        let line = text
            .lines()
            .find(|line| line.contains("poll failed, will retry"))
            .unwrap_or_else(|| panic!("no retry warning in:\n{text}"));
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("task_id=abc"), "{line}");
        assert!(line.contains("malformed response"), "{line}");

        handle.cancel();
    }

    #[tokio::test]
    async fn poll_cutoff_fails_with_timeout() {
        let backend = ScriptedBackend::new(vec![bad_body(), pending(), bad_body()]);
        let polls = backend.poll_counter();
        let client = TaskPollingClient::new(backend, config(3)).unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = settle(&handle).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error, Some(JobError::Timeout { attempts: 3 }));
        sleep(TICK * 5).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wall_clock_deadline_fails_with_timeout() {
        let backend = ScriptedBackend::new(Vec::new());
        let cfg = PollConfig::new(TICK, 10_000).with_timeout(TICK * 4);
        let client = TaskPollingClient::new(backend, cfg).unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = settle(&handle).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().map(JobError::kind), Some(ErrorKind::TimeoutError));
        assert!(job.poll_count < 10_000);
    }

    #[tokio::test]
    async fn cancel_before_first_poll_stops_everything() {
        let backend = ScriptedBackend::new(Vec::new());
        let polls = backend.poll_counter();
        let client = TaskPollingClient::new(backend, PollConfig::new(Duration::from_millis(200), 10))
            .unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        assert_eq!(handle.state(), JobState::Polling);

        client.cancel(&handle);
        client.cancel(&handle);

        let job = settle(&handle).await;
        assert!(job.cancelled);
        assert_eq!(job.state, JobState::Idle);
        assert!(job.error.is_none());
        assert_eq!(job.task_id, Some(TaskId::from("abc")));

        sleep(Duration::from_millis(400)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert_eq!(client.poll(&handle).await, PollOutcome::Skipped);
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let backend = ScriptedBackend::new(vec![finished("clean title")]);
        let client = TaskPollingClient::new(backend, config(10)).unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        settle(&handle).await;

        handle.cancel();
        handle.cancel();

        let job = handle.snapshot();
        assert_eq!(job.state, JobState::Completed);
        assert!(!job.cancelled);
        assert_eq!(job.result, Some(LookupResult::Text("clean title".into())));
    }

    #[tokio::test]
    async fn cancel_mid_poll_discards_the_reply() {
        let backend =
            ScriptedBackend::new(vec![finished("too late")]).with_poll_delay(Duration::from_millis(100));
        let polls = backend.poll_counter();
        let client = TaskPollingClient::new(backend, config(10)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        // Direct poll in flight while the job gets cancelled.
        let (outcome, _) = tokio::join!(client.poll(&handle), async {
            sleep(Duration::from_millis(30)).await;
            handle.cancel();
        });

        assert_eq!(outcome, PollOutcome::Skipped);
        let job = handle.snapshot();
        assert!(job.cancelled);
        assert!(job.result.is_none());
        assert!(polls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn direct_polls_are_serialized_and_late_replies_dropped() {
        let backend = ScriptedBackend::new(vec![finished("clean title"), finished("second")])
            .with_poll_delay(Duration::from_millis(20));
        let client =
            TaskPollingClient::new(backend, PollConfig::new(Duration::from_secs(60), 10)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        let (first, second) = tokio::join!(client.poll(&handle), client.poll(&handle));

        assert_eq!(first, PollOutcome::Finished(LookupResult::Text("clean title".into())));
        assert_eq!(second, PollOutcome::Skipped);
        let job = handle.snapshot();
        assert_eq!(job.result, Some(LookupResult::Text("clean title".into())));
        assert_eq!(job.poll_count, 1);
    }

    #[tokio::test]
    async fn direct_poll_reports_outcomes() {
        let backend = ScriptedBackend::new(vec![pending(), bad_body(), pending()]);
        let client =
            TaskPollingClient::new(backend, PollConfig::new(Duration::from_secs(60), 3)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        assert_eq!(client.poll(&handle).await, PollOutcome::Pending("in progress".into()));
        assert!(matches!(client.poll(&handle).await, PollOutcome::Transient(_)));
        assert_eq!(client.poll(&handle).await, PollOutcome::TimedOut { attempts: 3 });
        assert_eq!(client.poll(&handle).await, PollOutcome::Skipped);
    }

    #[tokio::test]
    async fn observers_see_every_transition() {
        let backend = ScriptedBackend::new(vec![pending(), finished("clean title")]);
        let client = TaskPollingClient::new(backend, config(10)).unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;

        let mut rx = handle.subscribe();
        let mut seen = Vec::new();
        loop {
            let job = rx.borrow_and_update().clone();
            seen.push(job.poll_count);
            if job.is_settled() {
                assert_eq!(
                    job.state_history,
                    vec![JobState::Idle, JobState::Submitting, JobState::Polling]
                );
                break;
            }
            rx.changed().await.unwrap();
        }
        assert_eq!(seen.last(), Some(&2));
    }

    #[tokio::test]
    async fn independent_jobs_do_not_interfere() {
        let backend = ScriptedBackend::new(Vec::new());
        let client = TaskPollingClient::new(backend, config(2)).unwrap();

        let first = client.submit(LookupRequest::new("A123BC77")).await;
        let second = client.submit(LookupRequest::new("B456CD99")).await;
        first.cancel();

        let job = settle(&second).await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.identifier, "B456CD99");
        assert!(first.snapshot().cancelled);
        assert_ne!(first.snapshot().handle_id, job.handle_id);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_polling() {
        let backend = ScriptedBackend::new(Vec::new());
        let polls = backend.poll_counter();
        let client = TaskPollingClient::new(backend, config(1_000)).unwrap();

        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        sleep(TICK * 3).await;
        drop(handle);

        sleep(TICK * 3).await;
        let after_drop = polls.load(Ordering::SeqCst);
        sleep(TICK * 5).await;
        assert_eq!(polls.load(Ordering::SeqCst), after_drop);
    }

    // --- HTTP scenarios against a mock backend ---

    fn http_client(server: &MockServer, max_polls: u32) -> TaskPollingClient<LookupApiClient> {
        TaskPollingClient::http(
            format!("{}/api/parse/", server.uri()),
            Arc::new(StaticToken::new("Tok3n")),
            config(max_polls),
        )
        .unwrap()
    }

    async fn result_calls(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/api/parse/result/")
            .count()
    }

    #[tokio::test]
    async fn scenario_progress_then_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/parse/"))
            .and(body_json(json!({"param1": "A123BC77"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "abc"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/parse/result/"))
            .and(header("X-CSRFToken", "Tok3n"))
            .and(body_json(json!({"task_id": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "in progress"})))
            .up_to_n_times(3)
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/parse/result/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "clean title"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client(&server, 10);
        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        assert_eq!(handle.state(), JobState::Polling);

        let job = settle(&handle).await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(LookupResult::Text("clean title".into())));

        sleep(TICK * 5).await;
        assert_eq!(result_calls(&server).await, 4);
    }

    #[tokio::test]
    async fn scenario_submit_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/parse/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = http_client(&server, 10);
        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = handle.snapshot();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().map(JobError::kind), Some(ErrorKind::SubmissionError));

        sleep(TICK * 5).await;
        assert_eq!(result_calls(&server).await, 0);
    }

    #[tokio::test]
    async fn scenario_cutoff_after_three_polls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/parse/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "abc"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/parse/result/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "in progress"})))
            .mount(&server)
            .await;

        let client = http_client(&server, 3);
        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = settle(&handle).await;

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_ref().map(JobError::kind), Some(ErrorKind::TimeoutError));

        sleep(TICK * 5).await;
        assert_eq!(result_calls(&server).await, 3);
    }

    #[tokio::test]
    async fn both_fields_resolve_to_completed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/parse/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": 17})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/parse/result/"))
            .and(body_json(json!({"task_id": "17"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"message": "in progress", "result": "clean title"})),
            )
            .mount(&server)
            .await;

        let client = http_client(&server, 10);
        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = settle(&handle).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(LookupResult::Text("clean title".into())));
        assert_eq!(job.poll_count, 1);
    }

    #[tokio::test]
    async fn server_errors_while_polling_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/parse/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "abc"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/parse/result/"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/parse/result/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {"owners": 2}})))
            .mount(&server)
            .await;

        let client = TaskPollingClient::http(
            format!("{}/api/parse/", server.uri()),
            Arc::new(NoCredentials),
            config(10),
        )
        .unwrap();
        let handle = client.submit(LookupRequest::new("A123BC77")).await;
        let job = settle(&handle).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.transient_failures, 2);
        assert_eq!(job.result, Some(LookupResult::Structured(json!({"owners": 2}))));
    }
}
