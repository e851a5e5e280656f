//! Best-effort DNS record updates after cutover.
//!
//! Repoints an A record at one instance of the freshly promoted
//! generation. DNS is a side channel for clients that bypass the
//! in-cluster service; failures are logged and swallowed so they can
//! never hold up a rotation.

use std::net::IpAddr;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info};

use crate::config::DnsConfig;

/// Record TTL in seconds; short so rotations propagate quickly.
const RECORD_TTL: u32 = 60;

/// DNS provider client.
pub struct DnsUpdater {
    client: reqwest::Client,
    config: DnsConfig,
}

impl DnsUpdater {
    /// Create an updater from config.
    pub fn new(config: DnsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self { client, config }
    }

    /// Upsert the A record to point at `new_ip`.
    pub async fn update_record(&self, new_ip: IpAddr) {
        let payload = json!({
            "name": self.config.record_name,
            "type": "A",
            "ttl": RECORD_TTL,
            "value": new_ip.to_string(),
        });

        let mut request = self.client.post(&self.config.update_url).json(&payload);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(record = %self.config.record_name, ip = %new_ip, "DNS record updated");
            }
            Ok(response) => {
                error!(
                    record = %self.config.record_name,
                    status = %response.status(),
                    "DNS update rejected"
                );
            }
            Err(e) => {
                error!(record = %self.config.record_name, error = %e, "DNS update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_upserts_a_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "name": "app.example.com",
                "type": "A",
                "ttl": 60,
                "value": "10.0.0.7",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let updater = DnsUpdater::new(DnsConfig {
            update_url: server.uri(),
            record_name: "app.example.com".to_string(),
            token: None,
        });
        updater.update_record("10.0.0.7".parse().unwrap()).await;
    }

    #[tokio::test]
    async fn test_provider_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let updater = DnsUpdater::new(DnsConfig {
            update_url: server.uri(),
            record_name: "app.example.com".to_string(),
            token: None,
        });

        // Must not panic or propagate.
        updater.update_record("10.0.0.7".parse().unwrap()).await;
    }
}
