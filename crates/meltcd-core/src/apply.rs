//! Orchestration backend.
//!
//! [`SwarmApplier`] speaks the Docker Engine HTTP API. Each definition is
//! created or updated on its own; a batch is not transactional and stops at
//! the first failure, leaving earlier services live.

use crate::error::{MeltcdError, Result};
use crate::manifest::ServiceDefinition;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label docker uses to group the services of one stack.
pub const NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Scoped names of the services created or updated, in order.
    pub applied: Vec<String>,
    /// Advisory messages from the backend. Never fatal.
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, defs: &[ServiceDefinition]) -> Result<ApplyReport>;
}

// ---------------------------------------------------------------------------
// Docker Engine API wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SwarmServiceSpec {
    name: String,
    labels: BTreeMap<String, String>,
    task_template: TaskTemplate,
    mode: ServiceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint_spec: Option<EndpointSpec>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TaskTemplate {
    container_spec: ContainerSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSpec {
    image: String,
    /// Compose `command` overrides the image CMD, which swarm calls `Args`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceMode {
    replicated: Replicated,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Replicated {
    replicas: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointSpec {
    ports: Vec<EndpointPort>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointPort {
    protocol: String,
    target_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_port: Option<u16>,
    publish_mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct ServiceInspect {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Version")]
    version: ObjectVersion,
}

#[derive(Debug, Deserialize)]
struct ObjectVersion {
    #[serde(rename = "Index")]
    index: u64,
}

#[derive(Debug, Deserialize)]
struct WarningsResponse {
    #[serde(rename = "Warnings", default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

fn namespace(def: &ServiceDefinition) -> &str {
    def.name
        .strip_suffix(def.service.as_str())
        .and_then(|s| s.strip_suffix('_'))
        .unwrap_or(&def.name)
}

impl From<&ServiceDefinition> for SwarmServiceSpec {
    fn from(def: &ServiceDefinition) -> Self {
        let mut labels = def.labels.clone();
        labels.insert(NAMESPACE_LABEL.to_string(), namespace(def).to_string());

        let endpoint_spec = (!def.ports.is_empty()).then(|| EndpointSpec {
            ports: def
                .ports
                .iter()
                .map(|p| EndpointPort {
                    protocol: p.protocol.as_str().to_string(),
                    target_port: p.target,
                    published_port: p.published,
                    publish_mode: "ingress",
                })
                .collect(),
        });

        SwarmServiceSpec {
            name: def.name.clone(),
            labels,
            task_template: TaskTemplate {
                container_spec: ContainerSpec {
                    image: def.image.clone(),
                    args: def.command.clone(),
                    env: def
                        .environment
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect(),
                    labels: BTreeMap::from([(
                        NAMESPACE_LABEL.to_string(),
                        namespace(def).to_string(),
                    )]),
                },
            },
            mode: ServiceMode {
                replicated: Replicated {
                    replicas: def.replicas,
                },
            },
            endpoint_spec,
        }
    }
}

// ---------------------------------------------------------------------------
// SwarmApplier
// ---------------------------------------------------------------------------

pub struct SwarmApplier {
    client: reqwest::Client,
    base: String,
}

impl SwarmApplier {
    /// `endpoint` is the engine's HTTP address, e.g. `http://127.0.0.1:2375`.
    /// With `api_version` set, requests are pinned to `/v{api_version}`.
    pub fn new(endpoint: &str, api_version: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeltcdError::BackendUnavailable(e.to_string()))?;
        let mut base = endpoint.trim_end_matches('/').to_string();
        if let Some(v) = api_version.map(|v| v.trim_start_matches('v')) {
            base.push_str(&format!("/v{v}"));
        }
        Ok(Self { client, base })
    }

    async fn apply_one(&self, def: &ServiceDefinition) -> Result<Vec<String>> {
        let spec = SwarmServiceSpec::from(def);

        let inspect = self
            .client
            .get(format!("{}/services/{}", self.base, def.name))
            .send()
            .await
            .map_err(transport)?;

        let response = match inspect.status() {
            StatusCode::NOT_FOUND => {
                debug!(service = %def.name, "creating service");
                self.client
                    .post(format!("{}/services/create", self.base))
                    .json(&spec)
                    .send()
                    .await
                    .map_err(transport)?
            }
            status if status.is_success() => {
                let current: ServiceInspect = inspect.json().await.map_err(transport)?;
                debug!(service = %def.name, id = %current.id, version = current.version.index, "updating service");
                self.client
                    .post(format!("{}/services/{}/update", self.base, current.id))
                    .query(&[("version", current.version.index)])
                    .json(&spec)
                    .send()
                    .await
                    .map_err(transport)?
            }
            _ => return Err(status_error(def, inspect).await),
        };

        if !response.status().is_success() {
            return Err(status_error(def, response).await);
        }
        let body: WarningsResponse = response.json().await.map_err(transport)?;
        Ok(body.warnings.unwrap_or_default())
    }
}

#[async_trait]
impl Applier for SwarmApplier {
    async fn apply(&self, defs: &[ServiceDefinition]) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        for def in defs {
            let warnings = self.apply_one(def).await?;
            if !warnings.is_empty() {
                warn!(service = %def.name, warnings = ?warnings, "backend returned warnings");
            }
            info!(service = %def.name, image = %def.image, replicas = def.replicas, "service applied");
            report.applied.push(def.name.clone());
            report.warnings.extend(warnings);
        }
        Ok(report)
    }
}

fn transport(e: reqwest::Error) -> MeltcdError {
    MeltcdError::BackendUnavailable(e.to_string())
}

async fn status_error(def: &ServiceDefinition, response: reqwest::Response) -> MeltcdError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or_else(|_| {
            if text.trim().is_empty() {
                status.to_string()
            } else {
                text.trim().to_string()
            }
        });
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            MeltcdError::BackendUnavailable(message)
        }
        _ => MeltcdError::ApplyRejected {
            service: def.name.clone(),
            reason: message,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest;
    use mockito::Matcher;
    use serde_json::json;

    fn defs(yaml: &str) -> Vec<ServiceDefinition> {
        manifest::parse("web", yaml.as_bytes()).unwrap()
    }

    fn applier(server: &mockito::ServerGuard) -> SwarmApplier {
        SwarmApplier::new(&server.url(), None, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn spec_translation() {
        let defs = defs(
            "services:\n  web:\n    image: nginx:1.25\n    replicas: 3\n    command: [nginx, -g, daemon off;]\n    environment: {A: b}\n    ports: [\"8080:80\"]\n    labels: {tier: edge}\n",
        );
        let value = serde_json::to_value(SwarmServiceSpec::from(&defs[0])).unwrap();
        assert_eq!(
            value,
            json!({
                "Name": "web_web",
                "Labels": {"com.docker.stack.namespace": "web", "tier": "edge"},
                "TaskTemplate": {"ContainerSpec": {
                    "Image": "nginx:1.25",
                    "Args": ["nginx", "-g", "daemon off;"],
                    "Env": ["A=b"],
                    "Labels": {"com.docker.stack.namespace": "web"}
                }},
                "Mode": {"Replicated": {"Replicas": 3}},
                "EndpointSpec": {"Ports": [{
                    "Protocol": "tcp", "TargetPort": 80, "PublishedPort": 8080, "PublishMode": "ingress"
                }]}
            })
        );
    }

    #[tokio::test]
    async fn creates_missing_service_and_collects_warnings() {
        let mut server = mockito::Server::new_async().await;
        let inspect = server
            .mock("GET", "/services/web_web")
            .with_status(404)
            .with_body(r#"{"message":"service web_web not found"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/services/create")
            .match_body(Matcher::PartialJson(json!({
                "Name": "web_web",
                "Mode": {"Replicated": {"Replicas": 3}}
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ID":"abc123","Warnings":["image nginx:1.25 could not be accessed"]}"#)
            .create_async()
            .await;

        let report = applier(&server)
            .apply(&defs("services:\n  web:\n    image: nginx:1.25\n    replicas: 3\n"))
            .await
            .unwrap();

        inspect.assert_async().await;
        create.assert_async().await;
        assert_eq!(report.applied, ["web_web"]);
        assert_eq!(report.warnings, ["image nginx:1.25 could not be accessed"]);
    }

    #[tokio::test]
    async fn updates_existing_service_at_current_version() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/services/web_web")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ID":"svc1","Version":{"Index":42},"Spec":{}}"#)
            .create_async()
            .await;
        let update = server
            .mock("POST", "/services/svc1/update")
            .match_query(Matcher::UrlEncoded("version".into(), "42".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Warnings":null}"#)
            .create_async()
            .await;

        let report = applier(&server)
            .apply(&defs("services:\n  web:\n    image: nginx:1.26\n"))
            .await
            .unwrap();

        update.assert_async().await;
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn rejection_stops_the_batch() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/services/web_api")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/services/create")
            .with_status(400)
            .with_body(r#"{"message":"invalid mount config for type \"bind\""}"#)
            .create_async()
            .await;
        let never = server
            .mock("GET", "/services/web_worker")
            .expect(0)
            .create_async()
            .await;

        let err = applier(&server)
            .apply(&defs(
                "services:\n  api:\n    image: api:1\n  worker:\n    image: worker:1\n",
            ))
            .await
            .unwrap_err();

        never.assert_async().await;
        match err {
            MeltcdError::ApplyRejected { service, reason } => {
                assert_eq!(service, "web_api");
                assert!(reason.contains("invalid mount config"));
            }
            other => panic!("expected ApplyRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn swarm_not_ready_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/services/web_web")
            .with_status(503)
            .with_body(r#"{"message":"This node is not a swarm manager."}"#)
            .create_async()
            .await;

        let err = applier(&server)
            .apply(&defs("services:\n  web:\n    image: nginx\n"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, MeltcdError::BackendUnavailable(m) if m.contains("swarm manager")),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_unavailable() {
        let applier =
            SwarmApplier::new("http://127.0.0.1:1", None, Duration::from_secs(2)).unwrap();
        let err = applier
            .apply(&defs("services:\n  web:\n    image: nginx\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, MeltcdError::BackendUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn api_version_prefixes_paths() {
        let mut server = mockito::Server::new_async().await;
        let inspect = server
            .mock("GET", "/v1.43/services/web_web")
            .with_status(200)
            .with_body(r#"{"ID":"svc1","Version":{"Index":1}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1.43/services/svc1/update")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{}"#)
            .create_async()
            .await;

        SwarmApplier::new(&server.url(), Some("v1.43"), Duration::from_secs(5))
            .unwrap()
            .apply(&defs("services:\n  web:\n    image: nginx\n"))
            .await
            .unwrap();
        inspect.assert_async().await;
    }
}
