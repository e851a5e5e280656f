//! Kubernetes REST binding for the orchestrator capability surface.
//!
//! New generations are created by re-stamping the template deployment
//! with a fresh `mtd-rotation` label; cutover patches the service
//! selector to the promoted generation's label.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use mtd_pool::{GenerationLabel, Instance};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Orchestrator, OrchestratorError};
use crate::config::Config;

/// Workload label carrying the generation identity.
pub const ROTATION_LABEL: &str = "mtd-rotation";

/// Label selector matching decoy pods.
const DECOY_SELECTOR: &str = "app=decoy";

/// Kubernetes API client.
pub struct KubeOrchestrator {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    namespace: String,
    template_deployment: String,
    service_name: String,
    app_port: u16,
}

impl KubeOrchestrator {
    /// Create a new client from config.
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.kube_api_url.trim_end_matches('/').to_string(),
            token: config.kube_token.clone(),
            namespace: config.namespace.clone(),
            template_deployment: config.template_deployment.clone(),
            service_name: config.service_name.clone(),
            app_port: config.app_port,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.get(url))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Create `count` decoy pods carrying `label`.
    ///
    /// Decoys are bare pods outside any generation's deployment; they
    /// exist only to muddy reconnaissance. Not part of the core
    /// capability trait.
    pub async fn create_decoys(
        &self,
        count: u32,
        label: &GenerationLabel,
    ) -> Result<(), OrchestratorError> {
        let url = format!("{}/api/v1/namespaces/{}/pods", self.base_url, self.namespace);

        for _ in 0..count {
            let pod_name = format!("decoy-pod-{:04}", rand::random_range(1000..10_000));
            let pod = json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": pod_name,
                    "labels": { "app": "decoy", ROTATION_LABEL: label.as_str() }
                },
                "spec": {
                    "containers": [{ "name": "decoy-container", "image": "nginx" }]
                }
            });

            let response = self.authed(self.client.post(&url)).json(&pod).send().await?;
            check(response, "create decoy pod").await?;
            debug!(pod_name = %pod_name, label = %label, "Created decoy pod");
        }

        info!(count, label = %label, "Created decoy pods");
        Ok(())
    }

    /// Delete all decoy pods, regardless of generation label.
    pub async fn delete_decoys(&self) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods?labelSelector={}",
            self.base_url, self.namespace, DECOY_SELECTOR
        );

        let response = self.authed(self.client.delete(&url)).send().await?;
        check(response, "delete decoy pods").await?;
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_instances(
        &self,
        label_selector: &str,
    ) -> Result<Vec<Instance>, OrchestratorError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods?labelSelector={}",
            self.base_url, self.namespace, label_selector
        );
        debug!(url = %url, "Listing pods");

        let response = self.get(&url).send().await?;
        let response = check(response, "list pods").await?;
        let pod_list: PodList = response.json().await?;

        let mut instances = Vec::new();
        for pod in pod_list.items {
            let running = pod.status.phase.as_deref() == Some("Running");
            let Some(ip) = pod.status.pod_ip else { continue };
            if !running {
                continue;
            }

            let Ok(address) = format!("{}:{}", ip, self.app_port).parse::<SocketAddr>() else {
                debug!(pod = %pod.metadata.name, ip = %ip, "Skipping pod with unparsable IP");
                continue;
            };

            // Pods outside the rotation scheme (e.g. the template
            // deployment's own pods) carry no rotation label; they are
            // not part of any generation and must never be adopted.
            let Some(label) = pod.metadata.labels.get(ROTATION_LABEL) else {
                debug!(pod = %pod.metadata.name, "Skipping pod without rotation label");
                continue;
            };
            let label = GenerationLabel::from_observed(label.clone());

            instances.push(Instance::new(pod.metadata.name, address, label));
        }

        debug!(count = instances.len(), selector = %label_selector, "Found running pods");
        Ok(instances)
    }

    async fn create_generation(
        &self,
        label: &GenerationLabel,
        replicas: u32,
    ) -> Result<(), OrchestratorError> {
        // Read the template deployment and re-stamp it for this generation.
        let template_url = format!(
            "{}/apis/apps/v1/namespaces/{}/deployments/{}",
            self.base_url, self.namespace, self.template_deployment
        );
        let response = self.get(&template_url).send().await?;
        let response = check(response, "read template deployment").await?;
        let mut deployment: Value = response.json().await?;

        let name = format!("{}-{}", self.template_deployment, label);
        stamp_deployment(&mut deployment, &name, label, replicas);

        let create_url = format!(
            "{}/apis/apps/v1/namespaces/{}/deployments",
            self.base_url, self.namespace
        );
        let response = self
            .authed(self.client.post(&create_url))
            .json(&deployment)
            .send()
            .await?;
        check(response, "create deployment").await?;

        info!(deployment = %name, replicas, "Created generation deployment");
        Ok(())
    }

    async fn delete_generation(&self, label: &GenerationLabel) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/apis/apps/v1/namespaces/{}/deployments?labelSelector={}={}",
            self.base_url, self.namespace, ROTATION_LABEL, label
        );

        let response = self.authed(self.client.delete(&url)).send().await?;
        check(response, "delete generation deployments").await?;

        info!(label = %label, "Deleted generation deployments");
        Ok(())
    }

    async fn update_traffic_target(
        &self,
        label: &GenerationLabel,
    ) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/api/v1/namespaces/{}/services/{}",
            self.base_url, self.namespace, self.service_name
        );
        let patch = json!({
            "spec": { "selector": { ROTATION_LABEL: label.as_str() } }
        });

        let response = self
            .authed(self.client.patch(&url))
            .header("Content-Type", "application/strategic-merge-patch+json")
            .json(&patch)
            .send()
            .await?;
        check(response, "patch service selector").await?;

        info!(service = %self.service_name, label = %label, "Updated service selector");
        Ok(())
    }
}

/// Rewrite a template deployment into a generation deployment.
fn stamp_deployment(deployment: &mut Value, name: &str, label: &GenerationLabel, replicas: u32) {
    let label_value = Value::String(label.as_str().to_string());

    if let Some(metadata) = deployment.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("name".to_string(), Value::String(name.to_string()));
        // Server-assigned fields must not be echoed back on create.
        metadata.remove("resourceVersion");
        metadata.remove("uid");
        metadata.remove("creationTimestamp");
    }

    if let Some(spec) = deployment.get_mut("spec").and_then(Value::as_object_mut) {
        spec.insert("replicas".to_string(), Value::from(replicas));

        if let Some(match_labels) = spec
            .get_mut("selector")
            .and_then(|s| s.get_mut("matchLabels"))
            .and_then(Value::as_object_mut)
        {
            match_labels.insert(ROTATION_LABEL.to_string(), label_value.clone());
        }

        if let Some(pod_labels) = spec
            .get_mut("template")
            .and_then(|t| t.get_mut("metadata"))
            .and_then(|m| m.get_mut("labels"))
            .and_then(Value::as_object_mut)
        {
            pod_labels.insert(ROTATION_LABEL.to_string(), label_value);
        }
    }
}

async fn check(
    response: reqwest::Response,
    operation: &str,
) -> Result<reqwest::Response, OrchestratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        Err(OrchestratorError::NotFound(format!("{operation}: {body}")))
    } else {
        Err(OrchestratorError::Api {
            status: status.as_u16(),
            body: format!("{operation}: {body}"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(rename = "podIP", default)]
    pod_ip: Option<String>,
}
