//! Task execution harness.
//!
//! `task/execute` calls are queued on a bounded channel and run one at a time
//! by a single consumer. Every accepted call gets exactly one response: the
//! handler's result on success, METHOD_NOT_FOUND for an unknown task type,
//! INTERNAL_ERROR when the handler fails or panics or the queue is full.

use super::registry::{HandlerRegistry, TaskRequest};
use crate::rpc::reply;
use crate::transport::Outbox;
use futures::FutureExt;
use orrery_protocol::{AgentResponse, AgentType, Call, RpcError};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

struct Job {
    call: Call,
    outbox: Outbox,
}

/// Producer side of the task queue.
#[derive(Clone)]
pub struct Harness {
    jobs: mpsc::Sender<Job>,
    depth: Arc<AtomicUsize>,
}

impl Harness {
    /// Start the consumer. It stops when `shutdown` fires or every
    /// producer handle is dropped.
    pub fn start(
        capacity: usize,
        registry: Arc<HandlerRegistry>,
        agent_type: AgentType,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let depth = Arc::new(AtomicUsize::new(0));
        let consumer = tokio::spawn(consume(rx, registry, agent_type, depth.clone(), shutdown));
        (Self { jobs: tx, depth }, consumer)
    }

    /// Queue a call without waiting. A full queue or a stopped consumer
    /// answers the call with INTERNAL_ERROR right away, so the caller's
    /// read loop never stalls behind a slow handler.
    pub fn enqueue(&self, call: Call, outbox: Outbox) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        let (job, reason) = match self.jobs.try_send(Job { call, outbox }) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(job)) => (job, "task queue full"),
            Err(mpsc::error::TrySendError::Closed(job)) => (job, "worker is shutting down"),
        };
        self.depth.fetch_sub(1, Ordering::SeqCst);
        tracing::warn!(correlation_id = %job.call.id, reason, "Rejecting task");
        reply(&job.outbox, &job.call, Err(RpcError::internal(reason)));
    }

    /// Tasks queued but not yet started.
    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

async fn consume(
    mut jobs: mpsc::Receiver<Job>,
    registry: Arc<HandlerRegistry>,
    agent_type: AgentType,
    depth: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        depth.fetch_sub(1, Ordering::SeqCst);

        let started = Instant::now();
        let outcome = execute(&registry, agent_type, &job.call).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::info!(correlation_id = %job.call.id, elapsed_ms, "Task completed"),
            Err(e) => tracing::warn!(correlation_id = %job.call.id, code = e.code, error = %e.message, elapsed_ms, "Task failed"),
        }
        reply(&job.outbox, &job.call, outcome);
    }

    // Anything still queued gets an answer instead of a silent timeout.
    jobs.close();
    while let Ok(job) = jobs.try_recv() {
        depth.fetch_sub(1, Ordering::SeqCst);
        reply(
            &job.outbox,
            &job.call,
            Err(RpcError::internal("worker is shutting down")),
        );
    }
    tracing::debug!("Task harness stopped");
}

/// Run one `task/execute` call against the registry.
pub async fn execute(
    registry: &HandlerRegistry,
    agent_type: AgentType,
    call: &Call,
) -> Result<Value, RpcError> {
    let request = TaskRequest::from_params(&call.id, &call.params)?;
    let handler = registry
        .get(&request.task_type)
        .ok_or_else(|| RpcError::method_not_found(&request.task_type))?;

    let context_id = request.context_id.clone().unwrap_or_default();
    let span = tracing::info_span!(
        "task",
        task_id = %request.task_id,
        task_type = %request.task_type,
        agent_type = %agent_type
    );
    let outcome = AssertUnwindSafe(handler.handle(&request).instrument(span))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(result)) => {
            let response =
                AgentResponse::completed(request.task_id.clone(), context_id, agent_type, result);
            return serde_json::to_value(response).map_err(|e| RpcError::internal(e.to_string()));
        }
        Ok(Err(e)) => e.to_string(),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("handler panicked: {detail}")
        }
    };

    let response = AgentResponse::failed(request.task_id.clone(), context_id, agent_type, &failure);
    let data = serde_json::to_value(response).ok();
    let mut error = RpcError::internal(failure);
    error.data = data;
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Frame;
    use crate::worker::registry::{HandlerError, TaskHandler};
    use async_trait::async_trait;
    use orrery_protocol::{codes, Envelope, Method, Response};
    use serde_json::json;
    use std::time::Duration;

    struct Sleepy {
        delay: Duration,
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TaskHandler for Sleepy {
        fn task_type(&self) -> &str {
            "sleepy"
        }

        fn description(&self) -> &str {
            "Sleeps, then records the task id"
        }

        async fn handle(&self, request: &TaskRequest) -> Result<Value, HandlerError> {
            tokio::time::sleep(self.delay).await;
            self.log.lock().push(request.task_id.clone());
            Ok(json!({"slept": true}))
        }
    }

    struct Failing;

    #[async_trait]
    impl TaskHandler for Failing {
        fn task_type(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        async fn handle(&self, _request: &TaskRequest) -> Result<Value, HandlerError> {
            Err(HandlerError::Failed("boom".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl TaskHandler for Panicking {
        fn task_type(&self) -> &str {
            "panicking"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        async fn handle(&self, _request: &TaskRequest) -> Result<Value, HandlerError> {
            panic!("handler exploded")
        }
    }

    fn registry(log: Arc<parking_lot::Mutex<Vec<String>>>) -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Sleepy {
            delay: Duration::from_millis(20),
            log,
        }));
        registry.register(Arc::new(Failing));
        registry.register(Arc::new(Panicking));
        Arc::new(registry)
    }

    fn call(id: &str, task_type: &str) -> Call {
        Call::new(
            id,
            Method::TaskExecute,
            json!({"task_id": id, "context_id": "ctx", "task_type": task_type, "data": {}}),
        )
    }

    async fn next_response(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Response {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("response in time")
            .expect("frame");
        match frame {
            Frame::Text(text) => match Envelope::decode(&text).unwrap() {
                Envelope::Response(response) => response,
                other => panic!("expected response, got {other:?}"),
            },
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_wraps_result_in_agent_response() {
        let log = Arc::default();
        let result = execute(&registry(log), AgentType::Execution, &call("t-1", "sleepy"))
            .await
            .unwrap();
        let response: AgentResponse = serde_json::from_value(result).unwrap();
        assert!(response.is_completed());
        assert_eq!(response.task_id, "t-1");
        assert_eq!(response.context_id, "ctx");
        assert_eq!(response.result, Some(json!({"slept": true})));
    }

    #[tokio::test]
    async fn test_unknown_task_type_is_method_not_found() {
        let err = execute(&registry(Arc::default()), AgentType::Execution, &call("t-1", "teleport"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handler_failure_is_internal_error_with_agent_response() {
        let err = execute(&registry(Arc::default()), AgentType::Execution, &call("t-2", "failing"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        let response: AgentResponse = serde_json::from_value(err.data.unwrap()).unwrap();
        assert!(!response.is_completed());
        assert_eq!(response.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let err = execute(&registry(Arc::default()), AgentType::Execution, &call("t-3", "panicking"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert!(err.message.contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_queue_runs_tasks_in_arrival_order() {
        let log: Arc<parking_lot::Mutex<Vec<String>>> = Arc::default();
        let shutdown = CancellationToken::new();
        let (harness, consumer) =
            Harness::start(8, registry(log.clone()), AgentType::Execution, shutdown.clone());
        let (outbox, mut rx) = Outbox::channel();

        for id in ["a", "b", "c"] {
            harness.enqueue(call(id, "sleepy"), outbox.clone());
        }

        let mut answered = Vec::new();
        for _ in 0..3 {
            answered.push(next_response(&mut rx).await.id);
        }
        assert_eq!(answered, vec!["a", "b", "c"]);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(harness.queue_depth(), 0);

        shutdown.cancel();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn test_every_task_gets_exactly_one_response() {
        let shutdown = CancellationToken::new();
        let (harness, consumer) =
            Harness::start(4, registry(Arc::default()), AgentType::Execution, shutdown.clone());
        let (outbox, mut rx) = Outbox::channel();

        harness.enqueue(call("ok", "sleepy"), outbox.clone());
        harness.enqueue(call("bad", "failing"), outbox.clone());
        harness.enqueue(call("gone", "teleport"), outbox.clone());

        let ok = next_response(&mut rx).await;
        assert_eq!(ok.id, "ok");
        assert!(ok.outcome.is_ok());
        let bad = next_response(&mut rx).await;
        assert_eq!(bad.outcome.unwrap_err().code, codes::INTERNAL_ERROR);
        let gone = next_response(&mut rx).await;
        assert_eq!(gone.outcome.unwrap_err().code, codes::METHOD_NOT_FOUND);

        shutdown.cancel();
        consumer.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_is_rejected() {
        let shutdown = CancellationToken::new();
        let (harness, consumer) =
            Harness::start(2, registry(Arc::default()), AgentType::Execution, shutdown.clone());
        shutdown.cancel();
        consumer.await.unwrap();

        let (outbox, mut rx) = Outbox::channel();
        harness.enqueue(call("late", "sleepy"), outbox);
        let response = next_response(&mut rx).await;
        assert_eq!(response.id, "late");
        assert_eq!(response.outcome.unwrap_err().code, codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_waiting() {
        let mut slow = HandlerRegistry::new();
        slow.register(Arc::new(Sleepy {
            delay: Duration::from_secs(2),
            log: Arc::default(),
        }));
        let shutdown = CancellationToken::new();
        let (harness, _consumer) =
            Harness::start(1, Arc::new(slow), AgentType::Execution, shutdown.clone());
        let (outbox, mut rx) = Outbox::channel();

        harness.enqueue(call("running", "sleepy"), outbox.clone());
        // Let the consumer pick up the first task so the second fills the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.enqueue(call("queued", "sleepy"), outbox.clone());
        assert_eq!(harness.queue_depth(), 1);

        let started = std::time::Instant::now();
        harness.enqueue(call("overflow", "sleepy"), outbox.clone());
        let rejected = next_response(&mut rx).await;
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(rejected.id, "overflow");
        let err = rejected.outcome.unwrap_err();
        assert_eq!(err.code, codes::INTERNAL_ERROR);
        assert!(err.message.contains("queue full"));
        assert_eq!(harness.queue_depth(), 1);

        shutdown.cancel();
    }
}
