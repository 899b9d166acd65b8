//! TOML-based configuration for Orrery
//!
//! One file (`orrery.toml`) configures both roles: the `[coordinator]`,
//! `[orchestration]` and `[admission]` sections drive the coordinator, the
//! `[worker]` section drives workers. Every field has a default, so an empty
//! file is valid.
//!
//! # Hot Reloading
//!
//! The coordinator reads orchestration and admission settings from
//! `OrreryConfigManager` for every submission, so edits to those sections
//! apply to the next task without a restart.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use orrery_protocol::AgentType;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from orrery.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrreryConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub admission: AdmissionConfig,
}

// ============= Coordinator Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Workers silent for longer than this are evicted
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_agent_timeout() -> u64 {
    90
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            agent_timeout_secs: default_agent_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

// ============= Worker Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Coordinator base URLs, probed in order
    #[serde(default = "default_coordinator_urls")]
    pub coordinator_urls: Vec<String>,

    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,

    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Bound of the task queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Port of the worker health server; none disables it
    #[serde(default)]
    pub health_port: Option<u16>,

    #[serde(default = "default_unregister_timeout")]
    pub unregister_timeout_ms: u64,
}

fn default_coordinator_urls() -> Vec<String> {
    vec!["http://127.0.0.1:8080".to_string()]
}

fn default_max_connect_retries() -> u32 {
    5
}

fn default_reconnect_base_delay() -> u64 {
    1000
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    10
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_unregister_timeout() -> u64 {
    500
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_urls: default_coordinator_urls(),
            max_connect_retries: default_max_connect_retries(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            ping_timeout_secs: default_ping_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            queue_capacity: default_queue_capacity(),
            health_port: None,
            unregister_timeout_ms: default_unregister_timeout(),
        }
    }
}

// ============= Orchestration Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Retries a single research task may consume across all stages
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// How long a finished context stays queryable
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_secs: u64,

    /// Agent type that runs every stage in single-agent mode
    #[serde(default = "default_single_agent_type")]
    pub single_agent_type: AgentType,
}

fn default_max_retries() -> u32 {
    3
}

fn default_stage_timeout() -> u64 {
    300
}

fn default_cleanup_grace() -> u64 {
    300
}

fn default_single_agent_type() -> AgentType {
    AgentType::Literature
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            stage_timeout_secs: default_stage_timeout(),
            cleanup_grace_secs: default_cleanup_grace(),
            single_agent_type: default_single_agent_type(),
        }
    }
}

impl OrchestrationConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

// ============= Admission Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Estimates strictly below this are approved without an override
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold_usd: f64,

    #[serde(default = "default_usd_per_1k_tokens")]
    pub usd_per_1k_tokens: f64,

    #[serde(default = "default_tokens_per_agent")]
    pub tokens_per_agent: u64,

    #[serde(default = "default_multi_agent_count")]
    pub multi_agent_count: u32,

    #[serde(default = "default_single_agent_count")]
    pub single_agent_count: u32,
}

fn default_auto_approve_threshold() -> f64 {
    0.50
}

fn default_usd_per_1k_tokens() -> f64 {
    0.005
}

fn default_tokens_per_agent() -> u64 {
    4000
}

fn default_multi_agent_count() -> u32 {
    5
}

fn default_single_agent_count() -> u32 {
    1
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold_usd: default_auto_approve_threshold(),
            usd_per_1k_tokens: default_usd_per_1k_tokens(),
            tokens_per_agent: default_tokens_per_agent(),
            multi_agent_count: default_multi_agent_count(),
            single_agent_count: default_single_agent_count(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Configuration warnings that don't prevent operation but may indicate issues
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub kind: ConfigWarningKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarningKind {
    PingOutlastsHeartbeat,
    EverythingNeedsOverride,
    NoCleanupGrace,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl OrreryConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: OrreryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.coordinator.agent_timeout_secs == 0 {
            return invalid("coordinator.agent_timeout_secs must be greater than 0");
        }

        let worker = &self.worker;
        if worker.coordinator_urls.is_empty() {
            return invalid("worker.coordinator_urls must name at least one coordinator");
        }
        if worker.max_connect_retries == 0 {
            return invalid("worker.max_connect_retries must be greater than 0");
        }
        if worker.heartbeat_interval_secs == 0 {
            return invalid("worker.heartbeat_interval_secs must be greater than 0");
        }
        if worker.ping_timeout_secs == 0 {
            return invalid("worker.ping_timeout_secs must be greater than 0");
        }
        if worker.queue_capacity == 0 {
            return invalid("worker.queue_capacity must be greater than 0");
        }

        if self.orchestration.stage_timeout_secs == 0 {
            return invalid("orchestration.stage_timeout_secs must be greater than 0");
        }
        if matches!(
            self.orchestration.single_agent_type,
            AgentType::AiProxy | AgentType::Credentials
        ) {
            return invalid("orchestration.single_agent_type must be a research agent type");
        }

        let admission = &self.admission;
        if !admission.auto_approve_threshold_usd.is_finite()
            || admission.auto_approve_threshold_usd < 0.0
        {
            return invalid("admission.auto_approve_threshold_usd must be a non-negative number");
        }
        if !admission.usd_per_1k_tokens.is_finite() || admission.usd_per_1k_tokens < 0.0 {
            return invalid("admission.usd_per_1k_tokens must be a non-negative number");
        }
        if admission.multi_agent_count == 0 || admission.single_agent_count == 0 {
            return invalid("admission agent counts must be greater than 0");
        }

        Ok(())
    }

    /// Validate and report settings that work but are probably unintended
    pub fn validate_with_warnings(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        self.validate()?;

        let mut warnings = Vec::new();

        if self.worker.ping_timeout_secs >= self.worker.heartbeat_interval_secs {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::PingOutlastsHeartbeat,
                message: format!(
                    "worker.ping_timeout_secs ({}) is not shorter than heartbeat_interval_secs ({})",
                    self.worker.ping_timeout_secs, self.worker.heartbeat_interval_secs
                ),
            });
        }

        let single_agent_cost = self.admission.single_agent_count as f64
            * self.admission.tokens_per_agent as f64
            / 1000.0
            * self.admission.usd_per_1k_tokens;
        if single_agent_cost >= self.admission.auto_approve_threshold_usd {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::EverythingNeedsOverride,
                message: "admission threshold is below the single-agent estimate; every task will need a cost override".to_string(),
            });
        }

        if self.orchestration.cleanup_grace_secs == 0 {
            warnings.push(ConfigWarning {
                kind: ConfigWarningKind::NoCleanupGrace,
                message: "orchestration.cleanup_grace_secs is 0; finished tasks cannot be queried".to_string(),
            });
        }

        Ok(warnings)
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct OrreryConfigManager {
    config: Arc<ArcSwap<OrreryConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl OrreryConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = OrreryConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Create a config manager directly from a config. No file watching.
    pub fn from_config(config: OrreryConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("orrery.toml"),
            watcher: RwLock::new(None),
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<OrreryConfig> {
        self.config.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Swap in a new configuration after validating it
    pub fn replace(&self, config: OrreryConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = OrreryConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        // Debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let mut last_reload: Option<std::time::Instant> = None;
            let debounce_duration = Duration::from_millis(500);

            while rx.recv().await.is_some() {
                if last_reload.is_some_and(|at| at.elapsed() < debounce_duration) {
                    continue;
                }

                // Let the writer finish
                tokio::time::sleep(Duration::from_millis(100)).await;

                match OrreryConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                        last_reload = Some(std::time::Instant::now());
                    }
                    Err(e) => {
                        warn!(
                            "Failed to hot-reload config: {}. Keeping previous config.",
                            e
                        );
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("Configuration hot-reload watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn create_test_config() -> String {
        r#"
[coordinator]
host = "0.0.0.0"
port = 9090
log_level = "debug"
agent_timeout_secs = 120

[worker]
coordinator_urls = ["http://hub-a:9090", "http://hub-b:9090"]
max_connect_retries = 3
reconnect_base_delay_ms = 250
heartbeat_interval_secs = 15
ping_timeout_secs = 5
queue_capacity = 16
health_port = 9101

[orchestration]
max_retries = 2
stage_timeout_secs = 60
cleanup_grace_secs = 30
single_agent_type = "reasoning"

[admission]
auto_approve_threshold_usd = 0.25
usd_per_1k_tokens = 0.01
tokens_per_agent = 2000
multi_agent_count = 5
single_agent_count = 1
"#
        .to_string()
    }

    #[test]
    fn test_parse_full_config() {
        let config = OrreryConfig::from_toml(&create_test_config()).unwrap();

        assert_eq!(config.coordinator.port, 9090);
        assert_eq!(config.coordinator.agent_timeout(), Duration::from_secs(120));
        assert_eq!(config.worker.coordinator_urls.len(), 2);
        assert_eq!(config.worker.health_port, Some(9101));
        assert_eq!(config.orchestration.max_retries, 2);
        assert_eq!(config.orchestration.single_agent_type, AgentType::Reasoning);
        assert_eq!(config.admission.tokens_per_agent, 2000);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = OrreryConfig::from_toml("").unwrap();

        assert_eq!(config.coordinator.host, "127.0.0.1");
        assert_eq!(config.coordinator.port, 8080);
        assert_eq!(config.worker.max_connect_retries, 5);
        assert_eq!(config.worker.reconnect_base_delay_ms, 1000);
        assert_eq!(config.orchestration.max_retries, 3);
        assert_eq!(config.orchestration.single_agent_type, AgentType::Literature);
        assert_eq!(config.admission.auto_approve_threshold_usd, 0.50);
        assert_eq!(config.admission.multi_agent_count, 5);
        assert!(config.worker.health_port.is_none());
    }

    #[test]
    fn test_rejects_zero_queue_capacity() {
        let err = OrreryConfig::from_toml("[worker]\nqueue_capacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_rejects_empty_coordinator_list() {
        let err = OrreryConfig::from_toml("[worker]\ncoordinator_urls = []\n").unwrap_err();
        assert!(err.to_string().contains("coordinator_urls"));
    }

    #[test]
    fn test_rejects_non_research_single_agent_type() {
        let err = OrreryConfig::from_toml("[orchestration]\nsingle_agent_type = \"credentials\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let err = OrreryConfig::from_toml("[admission]\nauto_approve_threshold_usd = -1.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = OrreryConfig::from_toml("[coordinator\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_warnings() {
        let config = OrreryConfig::from_toml(
            "[worker]\nheartbeat_interval_secs = 5\nping_timeout_secs = 10\n[orchestration]\ncleanup_grace_secs = 0\n[admission]\nauto_approve_threshold_usd = 0.01\n",
        )
        .unwrap();
        let kinds: Vec<ConfigWarningKind> = config
            .validate_with_warnings()
            .unwrap()
            .into_iter()
            .map(|w| w.kind)
            .collect();

        assert!(kinds.contains(&ConfigWarningKind::PingOutlastsHeartbeat));
        assert!(kinds.contains(&ConfigWarningKind::EverythingNeedsOverride));
        assert!(kinds.contains(&ConfigWarningKind::NoCleanupGrace));
    }

    #[test]
    fn test_default_config_has_no_warnings() {
        let warnings = OrreryConfig::default().validate_with_warnings().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn test_load_missing_file() {
        let err = OrreryConfig::load("/definitely/not/here/orrery.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_manager_reload_picks_up_changes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestration]\nmax_retries = 1").unwrap();

        let manager = OrreryConfigManager::new(file.path()).unwrap();
        assert_eq!(manager.config().orchestration.max_retries, 1);

        std::fs::write(file.path(), "[orchestration]\nmax_retries = 4\n").unwrap();
        manager.reload().unwrap();
        assert_eq!(manager.config().orchestration.max_retries, 4);
    }

    #[test]
    fn test_manager_keeps_config_on_failed_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[coordinator]\nport = 7000").unwrap();

        let manager = OrreryConfigManager::new(file.path()).unwrap();
        std::fs::write(file.path(), "[worker]\nqueue_capacity = 0\n").unwrap();

        assert!(manager.reload().is_err());
        assert_eq!(manager.config().coordinator.port, 7000);
    }

    #[test]
    fn test_replace_validates() {
        let manager = OrreryConfigManager::from_config(OrreryConfig::default());
        let mut bad = OrreryConfig::default();
        bad.admission.multi_agent_count = 0;
        assert!(manager.replace(bad).is_err());

        let mut good = OrreryConfig::default();
        good.admission.auto_approve_threshold_usd = 1.0;
        manager.replace(good).unwrap();
        assert_eq!(manager.config().admission.auto_approve_threshold_usd, 1.0);
    }
}
