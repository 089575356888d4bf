use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// How the controller reaches services running inside the cluster.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    /// Probe for an in-cluster service account at startup.
    #[default]
    Auto,
    InCluster,
    OutOfCluster,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub endpoint_mode: EndpointMode,

    /// Interval at which every managed object is reconciled regardless of changes
    pub resync_interval_secs: u64,

    /// Upper bound on waiting for a port tunnel to become ready
    pub tunnel_ready_timeout_secs: u64,

    /// Per-request timeout for calls against the CTFd API
    pub http_timeout_secs: u64,

    pub error_requeue_secs: u64,
    pub error_backoff_secs: u64,

    /// Requeue delay while a dependency (e.g. a generated secret) does not exist yet
    pub dependency_requeue_secs: u64,

    pub ctfd_image: String,
    pub redis_image: String,
    pub mariadb_image: String,
    /// Must be a bitnami/minio image: the upload bucket is created through its
    /// `MINIO_DEFAULT_BUCKETS` variable and its data path is `/bitnami/minio/data`.
    pub minio_image: String,

    pub admin_name: String,
    pub admin_email: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoint_mode: EndpointMode::Auto,
            resync_interval_secs: 60 * 30,
            tunnel_ready_timeout_secs: 30,
            http_timeout_secs: 30,
            error_requeue_secs: 10,
            error_backoff_secs: 300,
            dependency_requeue_secs: 5,
            ctfd_image: "ctfd/ctfd:3.7.6".to_string(),
            redis_image: "redis:7.4-alpine".to_string(),
            mariadb_image: "mariadb:11.4".to_string(),
            minio_image: "bitnami/minio:2025.4.22".to_string(),
            admin_name: "admin".to_string(),
            admin_email: "admin@ctfd.internal".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load from an optional `controller.{yaml,toml,json}` file, overridden by environment
    /// variables (`TUNNEL_READY_TIMEOUT_SECS=10`, ...).
    pub fn load() -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::with_name("controller").required(false))
            .add_source(::config::Environment::default().try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("resync_interval_secs", self.resync_interval_secs),
            ("tunnel_ready_timeout_secs", self.tunnel_ready_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
            ("error_requeue_secs", self.error_requeue_secs),
            ("error_backoff_secs", self.error_backoff_secs),
            ("dependency_requeue_secs", self.dependency_requeue_secs),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, secs)| *secs == 0) {
            return Err(Error::ConfigError(format!("{key} must be greater than zero")));
        }

        let images = [
            ("ctfd_image", &self.ctfd_image),
            ("redis_image", &self.redis_image),
            ("mariadb_image", &self.mariadb_image),
            ("minio_image", &self.minio_image),
        ];
        if let Some((key, _)) = images.iter().find(|(_, image)| image.trim().is_empty()) {
            return Err(Error::ConfigError(format!("{key} must not be empty")));
        }

        if self.admin_name.is_empty() || self.admin_email.is_empty() {
            return Err(Error::ConfigError(
                "admin_name and admin_email must be set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn tunnel_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.tunnel_ready_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn dependency_requeue(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_secs)
    }
}
