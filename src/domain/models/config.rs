use serde::{Deserialize, Serialize};

/// Main configuration structure for tandem
///
/// Frozen at startup; the only runtime-mutable piece of configuration is
/// the current workspace root, which lives behind a lock in the
/// coordinator rather than here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Project workspace root used until a driver presence overrides it
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// RPC server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Task scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Worker type definitions
    #[serde(default)]
    pub workers: Vec<WorkerTypeConfig>,

    /// Watchdog thresholds
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Notifier behavior
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Worktree isolation
    #[serde(default)]
    pub worktrees: WorktreeConfig,

    /// Offline agents woken by auto-spawn
    #[serde(default)]
    pub auto_respond: Vec<AutoRespondConfig>,
}

fn default_workspace() -> String {
    ".".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            workers: vec![],
            watchdog: WatchdogConfig::default(),
            notifier: NotifierConfig::default(),
            worktrees: WorktreeConfig::default(),
            auto_respond: vec![],
        }
    }
}

/// RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Bind address for the local RPC socket
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port; 0 lets the OS choose
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    7341
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file. Empty means the per-user
    /// default (`~/.config/tandem/tandem.db`).
    #[serde(default)]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Message retention age in hours
    #[serde(default = "default_message_retention_hours")]
    pub message_retention_hours: i64,

    /// Maximum retained messages
    #[serde(default = "default_message_max_count")]
    pub message_max_count: usize,
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_message_retention_hours() -> i64 {
    72
}

const fn default_message_max_count() -> usize {
    500
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            max_connections: default_max_connections(),
            message_retention_hours: default_message_retention_hours(),
            message_max_count: default_message_max_count(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional log file; stderr when empty
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: String::new(),
        }
    }
}

/// Strategy used to route unassigned tasks to worker types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Pick the type with the smallest current + queued load
    LeastLoaded,
    /// Filter types whose capabilities cover the task, then least loaded
    CapabilityMatch,
    /// Rotate by oldest last assignment
    RoundRobin,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        Self::LeastLoaded
    }
}

impl AssignmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeastLoaded => "least_loaded",
            Self::CapabilityMatch => "capability_match",
            Self::RoundRobin => "round_robin",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "least_loaded" => Some(Self::LeastLoaded),
            "capability_match" => Some(Self::CapabilityMatch),
            "round_robin" => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

/// Task scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Assignment strategy, fixed at startup
    #[serde(default)]
    pub strategy: AssignmentStrategy,

    /// Fallback tick interval in seconds (mutations also trigger ticks)
    #[serde(default = "default_scheduler_tick_sec")]
    pub tick_interval_sec: u64,
}

const fn default_scheduler_tick_sec() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: AssignmentStrategy::default(),
            tick_interval_sec: default_scheduler_tick_sec(),
        }
    }
}

/// One managed worker type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerTypeConfig {
    /// Type name, e.g. "claude-code"; instance ids are `<name>-<n>`
    pub name: String,

    /// Command template; `{workspace}` expands to the effective workspace
    pub command: String,

    /// Maximum live instances
    #[serde(default = "default_instances")]
    pub instances: u32,

    /// Tasks a single instance may hold concurrently
    #[serde(default = "default_worker_max_tasks")]
    pub max_tasks: u32,

    /// Capabilities offered by this type
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Minimum gap between successive spawns of this type
    #[serde(default = "default_cooldown_sec")]
    pub cooldown_sec: u64,

    /// Hard wall-clock kill deadline per process; 0 disables
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,

    /// Consecutive failures tolerated before quarantine
    #[serde(default = "default_worker_max_retries")]
    pub max_retries: u32,

    /// Delay before re-spawning after a failure
    #[serde(default = "default_retry_delay_sec")]
    pub retry_delay_sec: u64,

    /// Kill an instance that never connects a session within this window
    #[serde(default = "default_starting_window_sec")]
    pub starting_window_sec: u64,

    /// Inherit the parent environment (true) or start from empty
    #[serde(default = "default_env_inherit")]
    pub env_inherit: bool,

    /// Glob patterns selecting parent variables when filtering
    #[serde(default)]
    pub env_include: Vec<String>,

    /// Explicit variables overlaid last; values support `${VAR}` expansion
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

const fn default_instances() -> u32 {
    1
}

const fn default_worker_max_tasks() -> u32 {
    1
}

const fn default_cooldown_sec() -> u64 {
    30
}

const fn default_timeout_sec() -> u64 {
    0
}

const fn default_worker_max_retries() -> u32 {
    3
}

const fn default_retry_delay_sec() -> u64 {
    10
}

const fn default_starting_window_sec() -> u64 {
    120
}

const fn default_env_inherit() -> bool {
    true
}

/// Watchdog thresholds, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_tick_sec")]
    pub tick_interval_sec: u64,

    /// Heartbeat silence before a WARNING message
    #[serde(default = "default_warning_sec")]
    pub warning_sec: i64,

    /// Heartbeat silence before a CRITICAL message
    #[serde(default = "default_critical_sec")]
    pub critical_sec: i64,

    /// Heartbeat silence before recovery kicks in
    #[serde(default = "default_recovery_sec")]
    pub recovery_sec: i64,
}

const fn default_watchdog_tick_sec() -> u64 {
    5
}

const fn default_warning_sec() -> i64 {
    180
}

const fn default_critical_sec() -> i64 {
    300
}

const fn default_recovery_sec() -> i64 {
    600
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval_sec: default_watchdog_tick_sec(),
            warning_sec: default_warning_sec(),
            critical_sec: default_critical_sec(),
            recovery_sec: default_recovery_sec(),
        }
    }
}

/// Notifier behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotifierConfig {
    /// Debounce window after a signal-file change
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Fallback poll guaranteeing progress across filesystem quirks
    #[serde(default = "default_fallback_poll_sec")]
    pub fallback_poll_sec: u64,
}

const fn default_debounce_ms() -> u64 {
    200
}

const fn default_fallback_poll_sec() -> u64 {
    60
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            fallback_poll_sec: default_fallback_poll_sec(),
        }
    }
}

/// When worktrees are released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeCleanup {
    /// Released when the owning process exits cleanly
    OnExit,
    /// Released when the instance is cancelled
    OnCancel,
    /// Never released automatically
    Never,
}

impl Default for WorktreeCleanup {
    fn default() -> Self {
        Self::OnExit
    }
}

/// Worktree isolation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorktreeConfig {
    /// Allocate per-instance checkouts when the workspace is a git repo
    #[serde(default)]
    pub enabled: bool,

    /// Directory receiving worktrees; relative to the workspace
    #[serde(default = "default_worktree_root")]
    pub root: String,

    /// Branch worktrees fork from; empty means current HEAD
    #[serde(default)]
    pub base_branch: String,

    #[serde(default)]
    pub cleanup: WorktreeCleanup,
}

fn default_worktree_root() -> String {
    ".tandem/worktrees".to_string()
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: default_worktree_root(),
            base_branch: String::new(),
            cleanup: WorktreeCleanup::default(),
        }
    }
}

/// A disconnected agent that can be woken when content arrives for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutoRespondConfig {
    /// Agent name the wake-up applies to
    pub agent: String,

    /// Command spawned to wake the agent
    pub command: String,

    /// Minimum gap between wake-ups for this agent
    #[serde(default = "default_auto_respond_cooldown_sec")]
    pub cooldown_sec: u64,
}

const fn default_auto_respond_cooldown_sec() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 7341);
        assert_eq!(config.watchdog.warning_sec, 180);
        assert_eq!(config.watchdog.critical_sec, 300);
        assert_eq!(config.watchdog.recovery_sec, 600);
        assert_eq!(config.notifier.debounce_ms, 200);
        assert_eq!(config.notifier.fallback_poll_sec, 60);
        assert_eq!(config.scheduler.strategy, AssignmentStrategy::LeastLoaded);
    }

    #[test]
    fn test_strategy_round_trip() {
        for s in [
            AssignmentStrategy::LeastLoaded,
            AssignmentStrategy::CapabilityMatch,
            AssignmentStrategy::RoundRobin,
        ] {
            assert_eq!(AssignmentStrategy::parse_str(s.as_str()), Some(s));
        }
        assert_eq!(AssignmentStrategy::parse_str("random"), None);
    }

    #[test]
    fn test_worker_type_defaults_from_yaml() {
        let yaml = r#"
            name: claude-code
            command: "claude --workspace {workspace}"
        "#;
        let w: WorkerTypeConfig = serde_yaml_compat(yaml);
        assert_eq!(w.instances, 1);
        assert_eq!(w.cooldown_sec, 30);
        assert_eq!(w.max_retries, 3);
        assert!(w.env_inherit);
    }

    fn serde_yaml_compat(yaml: &str) -> WorkerTypeConfig {
        use figment::providers::{Format, Yaml};
        figment::Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap()
    }
}
