//! `orrery init`: scaffold configuration for a coordinator and its workers.

use super::output::Output;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init operation
#[derive(Debug)]
pub enum InitResult {
    Success,
    /// orrery.toml exists and `--force` was not given
    AlreadyExists,
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
    /// Coordinator bind host
    pub host: String,
    /// Coordinator bind port
    pub port: u16,
}

pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing orrery");

    let base_path = &config.path;
    if !base_path.exists() {
        if let Err(e) = fs::create_dir_all(base_path) {
            output.error(&format!("Failed to create {}: {}", base_path.display(), e));
            return InitResult::Error(e.to_string());
        }
    }

    let config_path = base_path.join("orrery.toml");
    if config_path.exists() && !config.force {
        output.warning("orrery.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    if let Err(e) = write_file(&config_path, &generate_orrery_toml(&config), config.force) {
        output.error(&format!("Failed to create orrery.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "orrery.toml");

    let env_path = base_path.join(".env.example");
    if let Err(e) = write_file(&env_path, &generate_env_example(), config.force) {
        output.error(&format!("Failed to create .env.example: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("env", ".env.example");

    let gitignore_path = base_path.join(".gitignore");
    if gitignore_path.exists() {
        output.skipped(".gitignore", "already exists");
    } else if let Err(e) = write_file(&gitignore_path, &generate_gitignore(), false) {
        output.warning(&format!("Failed to create .gitignore: {}", e));
    } else {
        output.created("file", ".gitignore");
    }

    output.complete("orrery initialized");

    output.header("Next Steps");
    output.info("1. Start the coordinator:");
    output.command("orrery coordinator");
    output.info("2. Start one worker per agent type:");
    for agent_type in ["planner", "literature", "reasoning", "execution", "synthesis"] {
        output.command(&format!("orrery worker --agent-type {agent_type}"));
    }
    output.info("3. Submit a research task:");
    output.command("orrery submit \"effects of sleep on memory\" --wait");

    output.hint(&format!(
        "Coordinator will listen on http://{}:{}",
        config.host, config.port
    ));

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)
}

fn generate_orrery_toml(config: &InitConfig) -> String {
    format!(
        r#"# orrery configuration
# Changes to [admission] and [orchestration] apply to new tasks without a restart.

[coordinator]
host = "{host}"
port = {port}
log_level = "info"
# Workers silent for longer than this are evicted
agent_timeout_secs = 90

[worker]
# Probed in order; the first healthy coordinator wins
coordinator_urls = ["http://{host}:{port}"]
max_connect_retries = 5
reconnect_base_delay_ms = 1000
heartbeat_interval_secs = 30
ping_timeout_secs = 10
probe_timeout_ms = 2000
queue_capacity = 64
unregister_timeout_ms = 500
# health_port = 9100

[orchestration]
max_retries = 3
stage_timeout_secs = 300
cleanup_grace_secs = 300
single_agent_type = "literature"

[admission]
auto_approve_threshold_usd = 0.50
usd_per_1k_tokens = 0.005
tokens_per_agent = 4000
multi_agent_count = 5
single_agent_count = 1
"#,
        host = config.host,
        port = config.port
    )
}

fn generate_env_example() -> String {
    r#"# Log filter, overrides [coordinator].log_level
# RUST_LOG=orrery=debug,tower_http=info

# Identity of a worker started without --agent-id
# ORRERY_AGENT_ID=literature-1
"#
    .to_string()
}

fn generate_gitignore() -> String {
    r#"/target/
.env
*.log
.DS_Store
"#
    .to_string()
}
