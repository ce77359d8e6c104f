use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use ws_orchestrator::OrchestratorSettings;
use ws_provider::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_idle_limit")]
    pub idle_limit_secs: u64,

    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,

    /// Deadline for a single launch or terminate call.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_resolver_attempts")]
    pub resolver_attempts: u32,

    #[serde(default = "default_resolver_delay")]
    pub resolver_delay_secs: u64,

    /// YAML file replacing the built-in kind profiles.
    #[serde(default = "default_registry_file")]
    pub registry_file: Option<PathBuf>,

    #[serde(default)]
    pub local: LocalSettings,

    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub account: AccountSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalSettings {
    #[serde(default = "default_docker_bin")]
    pub docker_bin: PathBuf,

    #[serde(default = "default_docker_network")]
    pub network: Option<String>,

    /// Address the proxy dials to reach published container ports.
    #[serde(default = "default_host_address")]
    pub host_address: String,
}

/// The cluster backend is only registered when `api_url` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_cluster_url")]
    pub api_url: Option<String>,

    #[serde(default = "default_cluster_name")]
    pub cluster: String,

    #[serde(default = "default_cluster_subnets")]
    pub subnets: Vec<String>,

    #[serde(default = "default_cluster_security_groups")]
    pub security_groups: Vec<String>,

    #[serde(default = "default_cluster_container")]
    pub container_name: String,
}

/// The managed-account backend is only registered when `api_url` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSettings {
    #[serde(default = "default_account_url")]
    pub api_url: Option<String>,

    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_secs: u64,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn default_bind_addr() -> String {
    std::env::var("WS_API_BIND").unwrap_or_else(|_| "0.0.0.0:3121".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("WS_API_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".ws").join("api").join("ws.db")
}

fn default_data_root() -> PathBuf {
    std::env::var("WS_API_DATA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| OrchestratorSettings::default().data_root)
}

fn default_sweep_interval() -> u64 {
    env_parse("WS_API_SWEEP_INTERVAL").unwrap_or(300) // 5 minutes
}

fn default_idle_limit() -> u64 {
    env_parse("WS_API_IDLE_LIMIT").unwrap_or(3600)
}

fn default_ttl() -> u64 {
    env_parse("WS_API_DEFAULT_TTL").unwrap_or(4 * 3600)
}

fn default_max_ttl() -> u64 {
    env_parse("WS_API_MAX_TTL").unwrap_or(24 * 3600)
}

fn default_operation_timeout() -> u64 {
    env_parse("WS_API_OPERATION_TIMEOUT").unwrap_or(120)
}

fn default_resolver_attempts() -> u32 {
    env_parse("WS_API_RESOLVER_ATTEMPTS").unwrap_or(8)
}

fn default_resolver_delay() -> u64 {
    env_parse("WS_API_RESOLVER_DELAY").unwrap_or(2)
}

fn default_registry_file() -> Option<PathBuf> {
    std::env::var("WS_API_REGISTRY_FILE").ok().map(PathBuf::from)
}

fn default_docker_bin() -> PathBuf {
    std::env::var("WS_API_DOCKER_BIN")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("docker"))
}

fn default_docker_network() -> Option<String> {
    std::env::var("WS_API_DOCKER_NETWORK").ok()
}

fn default_host_address() -> String {
    std::env::var("WS_API_HOST_ADDRESS").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_cluster_url() -> Option<String> {
    std::env::var("WS_API_CLUSTER_URL").ok()
}

fn default_cluster_name() -> String {
    std::env::var("WS_API_CLUSTER").unwrap_or_else(|_| "workspaces".to_string())
}

fn default_cluster_subnets() -> Vec<String> {
    env_list("WS_API_CLUSTER_SUBNETS")
}

fn default_cluster_security_groups() -> Vec<String> {
    env_list("WS_API_CLUSTER_SECURITY_GROUPS")
}

fn default_cluster_container() -> String {
    std::env::var("WS_API_CLUSTER_CONTAINER").unwrap_or_else(|_| "workspace".to_string())
}

fn default_account_url() -> Option<String> {
    std::env::var("WS_API_ACCOUNT_URL").ok()
}

fn default_session_lifetime() -> u64 {
    env_parse("WS_API_ACCOUNT_SESSION_LIFETIME").unwrap_or(3600)
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            network: default_docker_network(),
            host_address: default_host_address(),
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            api_url: default_cluster_url(),
            cluster: default_cluster_name(),
            subnets: default_cluster_subnets(),
            security_groups: default_cluster_security_groups(),
            container_name: default_cluster_container(),
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            api_url: default_account_url(),
            session_lifetime_secs: default_session_lifetime(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            data_root: default_data_root(),
            sweep_interval_secs: default_sweep_interval(),
            idle_limit_secs: default_idle_limit(),
            default_ttl_secs: default_ttl(),
            max_ttl_secs: default_max_ttl(),
            operation_timeout_secs: default_operation_timeout(),
            resolver_attempts: default_resolver_attempts(),
            resolver_delay_secs: default_resolver_delay(),
            registry_file: default_registry_file(),
            local: LocalSettings::default(),
            cluster: ClusterSettings::default(),
            account: AccountSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            data_root: self.data_root.clone(),
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            max_ttl: Duration::from_secs(self.max_ttl_secs),
            idle_limit: Duration::from_secs(self.idle_limit_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.resolver_attempts,
            delay: Duration::from_secs(self.resolver_delay_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_carry_over() {
        let config = Config {
            idle_limit_secs: 60,
            max_ttl_secs: 7200,
            resolver_attempts: 3,
            resolver_delay_secs: 1,
            ..Config::default()
        };

        let settings = config.orchestrator_settings();
        assert_eq!(settings.idle_limit, Duration::from_secs(60));
        assert_eq!(settings.max_ttl, Duration::from_secs(7200));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_sweep_interval_is_clamped() {
        let config = Config {
            sweep_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
