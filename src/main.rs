use anyhow::Context;
use orrery::agents::{reference_identity, reference_registry};
use orrery::cli::client::CoordinatorClient;
use orrery::cli::init::{self, InitConfig, InitResult};
use orrery::cli::output::Output;
use orrery::cli::{Cli, Commands};
use orrery::coordinator::ContextStatus;
use orrery::types::ResearchRequest;
use orrery::utils::toml_config::{ConfigError, OrreryConfig, OrreryConfigManager};
use orrery::WorkerRuntime;
use orrery_protocol::AgentType;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match run(cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(default_level: &str, verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { default_level };
        EnvFilter::new(format!("orrery={level},tower_http={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file, or fall back to defaults when it does not exist.
fn load_config(path: &Path) -> anyhow::Result<OrreryConfigManager> {
    match OrreryConfigManager::new(path) {
        Ok(manager) => Ok(manager),
        Err(ConfigError::FileNotFound(_)) => {
            let config = OrreryConfig::default();
            config.validate()?;
            Ok(OrreryConfigManager::from_config(config))
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    let Cli {
        config: config_path,
        verbose,
        log_json,
        command,
        ..
    } = cli;

    let command = match command {
        Commands::Init {
            path,
            force,
            host,
            port,
        } => {
            let config = InitConfig {
                path,
                force,
                host,
                port,
            };
            return match init::run(config, output) {
                InitResult::Success | InitResult::AlreadyExists => Ok(()),
                InitResult::Error(e) => Err(anyhow::anyhow!(e)),
            };
        }
        command => command,
    };

    let config_exists = config_path.exists();
    let manager = Arc::new(load_config(&config_path)?);
    let config = manager.config();
    init_logging(&config.coordinator.log_level, verbose, log_json);

    if !config_exists {
        tracing::warn!(path = %config_path.display(), "Config file not found, using defaults");
    }
    for warning in config.validate_with_warnings()? {
        tracing::warn!(kind = ?warning.kind, "{}", warning.message);
    }

    match command {
        Commands::Coordinator => {
            if config_exists {
                manager.start_watching()?;
            }
            let addr = format!("{}:{}", config.coordinator.host, config.coordinator.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;

            output.banner();
            output.info(&format!("Coordinator on http://{addr}"));
            output.info(&format!("Agent socket at ws://{addr}/ws"));

            let shutdown = shutdown_on_ctrl_c();
            let state = orrery::coordinator::build_state(manager.clone());
            orrery::coordinator::serve(listener, state, shutdown).await?;
            manager.stop_watching();
            Ok(())
        }

        Commands::Worker {
            agent_type,
            agent_id,
            port,
            coordinators,
        } => {
            let agent_id = agent_id.unwrap_or_else(|| default_agent_id(agent_type));
            let mut settings = config.worker.clone();
            if port.is_some() {
                settings.health_port = port;
            }
            if !coordinators.is_empty() {
                settings.coordinator_urls = coordinators;
            }

            let identity = reference_identity(agent_id, agent_type)?;
            let runtime = WorkerRuntime::new(identity, reference_registry(agent_type)?, settings)?;
            forward_ctrl_c(runtime.shutdown_token());

            output.info(&format!("Worker {} ({})", runtime.identity().id, agent_type));
            runtime.run().await?;
            Ok(())
        }

        Commands::Submit {
            query,
            single_agent,
            cost_override,
            wait,
            coordinator,
        } => {
            let client = CoordinatorClient::new(coordinator_url(coordinator, &config));
            let request = ResearchRequest::new(query)
                .single_agent(single_agent)
                .with_cost_override(cost_override);
            let response = client.submit(&request).await?;
            let decision = &response.admission;

            output.header("Admission");
            output.kv("estimated cost", &format!("${:.4}", decision.estimated_cost_usd));
            output.kv("agents", &decision.agent_count.to_string());
            output.kv("reasoning", &decision.reasoning);

            let Some(task_id) = response.task_id else {
                output.warning("Task not started");
                output.hint("Re-submit with --cost-override to run it anyway");
                return Ok(());
            };
            output.success(&format!("Task {task_id} started"));

            if wait {
                output.header("Progress");
                let status = client
                    .wait_for_terminal(&task_id, Duration::from_secs(1), |status| {
                        output.stage(
                            status.completed_stages.len(),
                            status.total_stages,
                            status.stage.as_str(),
                        )
                    })
                    .await?;
                print_status(output, &status);
            }
            Ok(())
        }

        Commands::Status {
            task_id,
            coordinator,
        } => {
            let client = CoordinatorClient::new(coordinator_url(coordinator, &config));
            match client.status(&task_id).await? {
                Some(status) => print_status(output, &status),
                None => output.warning(&format!("Task {task_id} not found")),
            }
            Ok(())
        }

        Commands::Init { .. } => Ok(()),
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    forward_ctrl_c(token.clone());
    token
}

fn forward_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            token.cancel();
        }
    });
}

fn default_agent_id(agent_type: AgentType) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{agent_type}-{}", &suffix[..8])
}

fn coordinator_url(explicit: Option<String>, config: &OrreryConfig) -> String {
    explicit.unwrap_or_else(|| {
        let host = match config.coordinator.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            host => host,
        };
        format!("http://{}:{}", host, config.coordinator.port)
    })
}

fn print_status(output: &Output, status: &ContextStatus) {
    output.header(&format!("Task {}", status.task_id));
    output.kv("query", &status.query);
    output.kv("stage", status.stage.as_str());
    output.kv("progress", &format!("{:.0}%", status.progress));
    output.kv("retries", &format!("{}/{}", status.retry_count, status.max_retries));
    for stage in &status.completed_stages {
        output.list_item(&format!("{stage} done"));
    }
    for stage in &status.failed_stages {
        output.list_item(&format!("{stage} failed"));
    }
    if status.stage.is_terminal() {
        output.complete(&format!("Finished as {}", status.stage));
    }
}
