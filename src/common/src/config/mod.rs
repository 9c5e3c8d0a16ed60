use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "kpurge.toml";

/// Prefix for environment overrides, nested keys are split on `__`.
pub const ENV_PREFIX: &str = "KPURGE__";

/// How to reach the cluster.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct KubeConfig {
    /// Explicit kubeconfig path. When unset, `KUBECONFIG` or `~/.kube/config` is used.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of the current one.
    pub context: Option<String>,
}

/// Wait policy used while confirming that a deleted resource is gone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitConfig {
    /// How long a single wait phase may last before escalating (or failing)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Delay between two existence checks
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomResourceConfig {
    /// Only custom resource definitions whose name ends with this suffix are purged.
    pub schema_suffix: String,
}

impl Default for CustomResourceConfig {
    fn default() -> Self {
        Self {
            schema_suffix: "toolkit.fluxcd.io".to_string(),
        }
    }
}

/// Backend used to list and uninstall package-manager releases.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseDriver {
    /// Run the `helm` binary
    #[default]
    Helm,
    /// Operate on the release records stored as secrets, without running hooks
    Secrets,
}

impl std::fmt::Display for ReleaseDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseDriver::Helm => write!(f, "helm"),
            ReleaseDriver::Secrets => write!(f, "secrets"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub driver: ReleaseDriver,
    /// Path or name of the helm executable
    pub helm_binary: PathBuf,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            driver: ReleaseDriver::Helm,
            helm_binary: PathBuf::from("helm"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Delete every pod before the namespaces are removed
    pub enabled: bool,
    /// Grace period handed to the pod deletion, zero kills immediately
    pub grace_period_seconds: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_period_seconds: 0,
        }
    }
}

/// Convergence loop for the final namespace teardown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamespaceConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ConcurrencyConfig {
    /// Upper bound of deletions running at once within one fan-out. Unbounded when unset.
    pub max_parallel: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    pub kube: KubeConfig,
    pub wait: WaitConfig,
    pub custom_resources: CustomResourceConfig,
    pub releases: ReleaseConfig,
    pub workloads: WorkloadConfig,
    pub namespaces: NamespaceConfig,
    pub concurrency: ConcurrencyConfig,
    /// Ask for confirmation before purging when attached to a terminal
    pub confirm: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            kube: KubeConfig::default(),
            wait: WaitConfig::default(),
            custom_resources: CustomResourceConfig::default(),
            releases: ReleaseConfig::default(),
            workloads: WorkloadConfig::default(),
            namespaces: NamespaceConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            confirm: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("wait timeout ({timeout:?}) must be greater than the poll interval ({poll_interval:?})")]
    TimeoutNotAbovePoll {
        timeout: Duration,
        poll_interval: Duration,
    },

    #[error("{0} poll interval must be greater than zero")]
    ZeroPollInterval(&'static str),

    #[error("custom resource schema suffix cannot be empty")]
    EmptySchemaSuffix,

    #[error("concurrency.max_parallel must be at least 1")]
    ZeroParallelism,
}

impl Configuration {
    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load defaults, `kpurge.toml` when present and `KPURGE__*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Configuration = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval("wait"));
        }
        if self.wait.timeout <= self.wait.poll_interval {
            return Err(ConfigError::TimeoutNotAbovePoll {
                timeout: self.wait.timeout,
                poll_interval: self.wait.poll_interval,
            });
        }
        if self.namespaces.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval("namespace"));
        }
        if self.custom_resources.schema_suffix.is_empty() {
            return Err(ConfigError::EmptySchemaSuffix);
        }
        if self.concurrency.max_parallel == Some(0) {
            return Err(ConfigError::ZeroParallelism);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Configuration::default();

        assert_eq!(config.wait.timeout, Duration::from_secs(30));
        assert_eq!(config.wait.poll_interval, Duration::from_secs(1));
        assert_eq!(config.custom_resources.schema_suffix, "toolkit.fluxcd.io");
        assert_eq!(config.releases.driver, ReleaseDriver::Helm);
        assert!(config.workloads.enabled);
        assert_eq!(config.workloads.grace_period_seconds, 0);
        assert!(config.concurrency.max_parallel.is_none());
        assert!(config.confirm);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().expect("defaults should load");
            assert_eq!(config.namespaces.timeout, Duration::from_secs(300));
            assert!(config.kube.kubeconfig.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "kpurge.toml",
                r#"
                confirm = false

                [wait]
                timeout = "1m"
                poll_interval = "500ms"

                [releases]
                driver = "secrets"
                "#,
            )?;
            jail.set_env("KPURGE__WAIT__TIMEOUT", "45s");
            jail.set_env("KPURGE__CONCURRENCY__MAX_PARALLEL", "8");

            let config = Configuration::load().expect("config should load");
            assert!(!config.confirm);
            assert_eq!(config.wait.timeout, Duration::from_secs(45));
            assert_eq!(config.wait.poll_interval, Duration::from_millis(500));
            assert_eq!(config.releases.driver, ReleaseDriver::Secrets);
            assert_eq!(config.concurrency.max_parallel, Some(8));
            Ok(())
        });
    }

    #[test]
    fn test_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("purge.toml");
        std::fs::write(
            &path,
            "[custom_resources]\nschema_suffix = \"example.io\"\n\n[workloads]\nenabled = false\n",
        )
        .unwrap();

        let config = Configuration::load_from_path(&path).unwrap();
        assert_eq!(config.custom_resources.schema_suffix, "example.io");
        assert!(!config.workloads.enabled);
    }

    #[test]
    fn test_rejects_timeout_not_above_poll_interval() {
        let mut config = Configuration::default();
        config.wait.timeout = Duration::from_secs(1);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::TimeoutNotAbovePoll { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_poll_interval_and_parallelism() {
        let mut config = Configuration::default();
        config.wait.poll_interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroPollInterval("wait"))
        ));

        let mut config = Configuration::default();
        config.concurrency.max_parallel = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroParallelism)));
    }

    #[test]
    fn test_invalid_file_is_reported() {
        Jail::expect_with(|jail| {
            jail.create_file("kpurge.toml", "[wait]\ntimeout = \"soon\"\n")?;
            assert!(matches!(Configuration::load(), Err(ConfigError::Load(_))));
            Ok(())
        });
    }
}
