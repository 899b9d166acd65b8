//! Coordinator plus in-process reference workers over real sockets.

mod common;

use common::{
    spawn_coordinator, spawn_worker, spawn_worker_with, test_config, wait_until, worker_settings,
};
use orrery::cli::client::CoordinatorClient;
use orrery::types::ResearchRequest;
use orrery_protocol::{AgentType, Stage};
use std::time::Duration;

const FLEET: [(AgentType, &str); 5] = [
    (AgentType::Planner, "planner-1"),
    (AgentType::Literature, "literature-1"),
    (AgentType::Reasoning, "reasoning-1"),
    (AgentType::Execution, "execution-1"),
    (AgentType::Synthesis, "synthesis-1"),
];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_agent_pipeline_completes() {
    let coordinator = spawn_coordinator(test_config()).await;
    let url = coordinator.base_url();
    let workers: Vec<_> = FLEET
        .iter()
        .map(|(agent_type, id)| spawn_worker(*agent_type, id, &url))
        .collect();

    let directory = coordinator.state.directory.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let directory = directory.clone();
            async move { directory.len() == FLEET.len() }
        })
        .await,
        "all workers register"
    );
    assert_eq!(coordinator.health().await.connected_agents, 5);

    let client = CoordinatorClient::new(&url);
    let submitted = client
        .submit(&ResearchRequest::new("sleep and memory; exercise").with_user("u-1"))
        .await
        .expect("submit");
    let task_id = submitted.task_id.expect("admitted");

    let status = tokio::time::timeout(
        Duration::from_secs(15),
        client.wait_for_terminal(&task_id, Duration::from_millis(50), |_| {}),
    )
    .await
    .expect("pipeline finishes")
    .expect("status");

    assert_eq!(status.stage, Stage::Complete);
    assert_eq!(status.completed_stages.len(), 5);
    assert!(status.failed_stages.is_empty());
    assert_eq!(status.progress, 100.0);
    assert_eq!(status.user_id.as_deref(), Some("u-1"));
    assert!(status.results["synthesis"]["title"]
        .as_str()
        .unwrap()
        .contains("sleep and memory"));
    assert_eq!(status.results["reasoning"]["sources_considered"], 6);

    for worker in workers {
        worker.stop().await.expect("clean worker shutdown");
    }
    assert!(
        wait_until(Duration::from_secs(5), || {
            let directory = directory.clone();
            async move { directory.is_empty() }
        })
        .await,
        "workers unregister on shutdown"
    );
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_agent_pipeline_runs_on_literature_worker() {
    let coordinator = spawn_coordinator(test_config()).await;
    let url = coordinator.base_url();
    let worker = spawn_worker(AgentType::Literature, "literature-solo", &url);

    let directory = coordinator.state.directory.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let directory = directory.clone();
            async move { directory.len() == 1 }
        })
        .await
    );

    let client = CoordinatorClient::new(&url);
    let submitted = client
        .submit(&ResearchRequest::new("vitamin d").single_agent(true))
        .await
        .expect("submit");
    assert_eq!(submitted.admission.agent_count, 1);
    let task_id = submitted.task_id.expect("admitted");

    let status = tokio::time::timeout(
        Duration::from_secs(15),
        client.wait_for_terminal(&task_id, Duration::from_millis(50), |_| {}),
    )
    .await
    .expect("pipeline finishes")
    .expect("status");

    assert_eq!(status.stage, Stage::Complete);
    assert_eq!(
        status.completed_stages,
        vec![Stage::Planning, Stage::LiteratureReview, Stage::Synthesis]
    );

    let record = directory.get("literature-solo").expect("still registered");
    assert_eq!(record.dispatched, 3);

    worker.stop().await.expect("clean worker shutdown");
    coordinator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_agent_type_fails_pipeline() {
    let mut config = test_config();
    config.orchestration.max_retries = 1;
    let coordinator = spawn_coordinator(config).await;
    let url = coordinator.base_url();
    // Only a planner: literature review has nobody to run it.
    let worker = spawn_worker(AgentType::Planner, "planner-only", &url);

    let directory = coordinator.state.directory.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let directory = directory.clone();
            async move { directory.len() == 1 }
        })
        .await
    );

    let client = CoordinatorClient::new(&url);
    let task_id = client
        .submit(&ResearchRequest::new("q"))
        .await
        .expect("submit")
        .task_id
        .expect("admitted");

    let status = tokio::time::timeout(
        Duration::from_secs(15),
        client.wait_for_terminal(&task_id, Duration::from_millis(50), |_| {}),
    )
    .await
    .expect("pipeline finishes")
    .expect("status");

    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.completed_stages, vec![Stage::Planning]);
    assert_eq!(status.failed_stages, vec![Stage::LiteratureReview]);
    assert_eq!(status.retry_count, 1);

    worker.stop().await.expect("clean worker shutdown");
    coordinator.stop().await;
}

#[tokio::test]
async fn test_worker_gives_up_without_coordinator() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let worker = spawn_worker(AgentType::Planner, "orphan", &url);
    let result = tokio::time::timeout(Duration::from_secs(10), worker.handle)
        .await
        .expect("worker exits")
        .expect("join");
    assert!(matches!(result, Err(orrery::AppError::Transport(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_evicted_worker_reconnects_and_registers_again() {
    let mut config = test_config();
    config.coordinator.agent_timeout_secs = 1;
    let coordinator = spawn_coordinator(config).await;

    // Heartbeats slower than the coordinator's timeout get the worker evicted.
    let mut settings = worker_settings(vec![coordinator.base_url()]);
    settings.heartbeat_interval_secs = 30;
    settings.ping_timeout_secs = 5;
    let worker = spawn_worker_with(AgentType::Planner, "planner-1", settings);

    let directory = coordinator.state.directory.clone();
    assert!(
        wait_until(Duration::from_secs(5), || {
            let directory = directory.clone();
            async move { directory.get("planner-1").is_some() }
        })
        .await,
        "worker registers"
    );
    let first = directory.get("planner-1").unwrap().registered_at;

    assert!(
        wait_until(Duration::from_secs(10), || {
            let directory = directory.clone();
            async move {
                directory
                    .get("planner-1")
                    .is_some_and(|record| record.registered_at > first)
            }
        })
        .await,
        "worker registers again after eviction"
    );

    worker.stop().await.expect("clean worker shutdown");
    coordinator.stop().await;
}
