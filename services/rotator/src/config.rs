//! Rotator configuration (env-driven).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Default in-cluster service account token path.
const IN_CLUSTER_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Rotator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Desired instances per generation.
    pub replicas: u32,

    /// How long a generation stays active (rotation interval).
    pub rotation_interval: Duration,

    /// Delay between demotion and deletion of a generation.
    pub grace_period: Duration,

    /// Namespace the workload lives in.
    pub namespace: String,

    /// Label selector matching the service's backend instances.
    pub label_selector: String,

    /// Deployment used as the template for new generations.
    pub template_deployment: String,

    /// Service whose selector is patched at cutover.
    pub service_name: String,

    /// Whether cutover must succeed before the active/staging swap.
    pub graceful_rotation: bool,

    /// Poll budget for a generation to become ready.
    pub provision_timeout: Duration,

    /// Proxy bind address.
    pub listen_addr: SocketAddr,

    /// Port the backend application listens on inside each instance.
    pub app_port: u16,

    /// Decoy instances created per rotation (0 disables decoys).
    pub decoys: u32,

    /// Optional DNS updater settings.
    pub dns: Option<DnsConfig>,

    /// Kubernetes API server base URL.
    pub kube_api_url: String,

    /// Bearer token for the Kubernetes API, if any.
    pub kube_token: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// DNS record update settings.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Provider endpoint receiving record upserts.
    pub update_url: String,

    /// Fully qualified record name (e.g. app.example.com).
    pub record_name: String,

    /// Bearer token for the provider API.
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let replicas: u32 = std::env::var("MTD_REPLICAS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MTD_REPLICAS must be an integer")?
            .unwrap_or(3);

        let rotation_interval = env_duration("MTD_APP_TTL", Duration::from_secs(3000))?;
        let grace_period = env_duration("MTD_DECOMMISSION_PERIOD", Duration::from_secs(1500))?;
        let provision_timeout = env_duration("MTD_PROVISION_TIMEOUT", Duration::from_secs(30))?;

        let namespace = std::env::var("MTD_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let label_selector =
            std::env::var("MTD_LABEL_SELECTOR").unwrap_or_else(|_| "app=webapp".to_string());
        let template_deployment =
            std::env::var("MTD_TEMPLATE_DEPLOYMENT").unwrap_or_else(|_| "webapp".to_string());
        let service_name =
            std::env::var("MTD_SERVICE_NAME").unwrap_or_else(|_| "webapp-service".to_string());

        let graceful_rotation = std::env::var("MTD_GRACEFUL_ROTATION")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(true);

        let listen_addr: SocketAddr = std::env::var("MTD_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse()
            .context("MTD_LISTEN_ADDR must be a socket address")?;

        let app_port: u16 = std::env::var("MTD_APP_PORT")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MTD_APP_PORT must be a port number")?
            .unwrap_or(8080);

        let decoys: u32 = std::env::var("MTD_DECOYS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .context("MTD_DECOYS must be an integer")?
            .unwrap_or(0);

        let dns = match std::env::var("MTD_DNS_UPDATE_URL") {
            Ok(update_url) => Some(DnsConfig {
                update_url,
                record_name: std::env::var("MTD_DNS_RECORD_NAME")
                    .context("MTD_DNS_RECORD_NAME is required when MTD_DNS_UPDATE_URL is set")?,
                token: std::env::var("MTD_DNS_TOKEN").ok(),
            }),
            Err(_) => None,
        };

        let kube_api_url = std::env::var("MTD_KUBE_API_URL")
            .unwrap_or_else(|_| "https://kubernetes.default.svc".to_string());

        let kube_token = match std::env::var("MTD_KUBE_TOKEN") {
            Ok(token) => Some(token),
            Err(_) => {
                let path = std::env::var("MTD_KUBE_TOKEN_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(IN_CLUSTER_TOKEN_PATH));
                match std::fs::read_to_string(&path) {
                    Ok(token) => Some(token.trim().to_string()),
                    Err(_) => None,
                }
            }
        };

        let log_level = std::env::var("MTD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            replicas,
            rotation_interval,
            grace_period,
            namespace,
            label_selector,
            template_deployment,
            service_name,
            graceful_rotation,
            provision_timeout,
            listen_addr,
            app_port,
            decoys,
            dns,
            kube_api_url,
            kube_token,
            log_level,
        })
    }
}

/// Read a duration env var, accepting `500ms`, `3000s`, `50m`, `2h`,
/// or a bare number of seconds.
fn env_duration(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => parse_duration(&raw).with_context(|| format!("invalid duration in {name}")),
        Err(_) => Ok(default),
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);

    let value: u64 = digits
        .parse()
        .with_context(|| format!("expected a number, got {raw:?}"))?;

    match unit {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => bail!("unknown duration unit {other:?} in {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("3000s").unwrap(), Duration::from_secs(3000));
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_secs(1500));
        assert_eq!(parse_duration("50m").unwrap(), Duration::from_secs(3000));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10fortnights").is_err());
        assert!(parse_duration("").is_err());
    }
}
