//! Manifest parsing.
//!
//! A manifest is a compose-style YAML document:
//!
//! ```yaml
//! services:
//!   web:
//!     image: nginx:1.25
//!     replicas: 3
//!     ports: ["8080:80"]
//! ```
//!
//! [`parse`] turns it into [`ServiceDefinition`]s in declaration order, with
//! each service name prefixed by the application name. Parsing is pure, so the
//! same bytes always yield the same definitions and drift detection can rely
//! on plain equality.

use crate::error::{MeltcdError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "sctp" => Some(Protocol::Sctp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port exposed on the swarm ingress. `None` lets the orchestrator pick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<u16>,
    pub target: u16,
    pub protocol: Protocol,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.published {
            Some(p) => write!(f, "{p}:{}/{}", self.target, self.protocol.as_str()),
            None => write!(f, "{}/{}", self.target, self.protocol.as_str()),
        }
    }
}

/// Orchestrator-neutral description of one deployable service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Scoped name, `<app>_<service>`.
    pub name: String,
    /// Key the service was declared under in the manifest.
    pub service: String,
    pub image: String,
    pub replicas: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Raw document
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    services: Option<serde_yaml::Mapping>,
}

#[derive(Deserialize, Default)]
struct RawService {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    replicas: Option<u64>,
    #[serde(default)]
    deploy: Option<RawDeploy>,
    #[serde(default)]
    command: Option<StringOrList>,
    #[serde(default)]
    environment: Option<KeyValues>,
    #[serde(default)]
    ports: Vec<RawPort>,
    #[serde(default)]
    labels: Option<KeyValues>,
}

#[derive(Deserialize, Default)]
struct RawDeploy {
    #[serde(default)]
    replicas: Option<u64>,
    #[serde(default)]
    labels: Option<KeyValues>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeyValues {
    Map(BTreeMap<String, serde_yaml::Value>),
    List(Vec<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Short(String),
    Long {
        target: u16,
        #[serde(default)]
        published: Option<u16>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Parse
// ---------------------------------------------------------------------------

/// Parse raw manifest bytes into service definitions scoped to `app_name`.
pub fn parse(app_name: &str, raw: &[u8]) -> Result<Vec<ServiceDefinition>> {
    let doc: RawManifest =
        serde_yaml::from_slice(raw).map_err(|e| MeltcdError::ManifestInvalid(e.to_string()))?;
    let services = doc.services.ok_or_else(|| {
        MeltcdError::ManifestInvalid("missing top-level 'services' mapping".into())
    })?;
    if services.is_empty() {
        return Err(semantic("services", "manifest declares no services"));
    }

    let mut defs = Vec::with_capacity(services.len());
    for (key, value) in services {
        let service = key
            .as_str()
            .ok_or_else(|| MeltcdError::ManifestInvalid(format!("service name {key:?} is not a string")))?
            .to_string();
        if !paths::is_valid_name(&service) {
            return Err(semantic(&service, "invalid service name"));
        }
        let raw: RawService = if value.is_null() {
            RawService::default()
        } else {
            serde_yaml::from_value(value)
                .map_err(|e| MeltcdError::ManifestInvalid(format!("service '{service}': {e}")))?
        };
        defs.push(build(app_name, service, raw)?);
    }
    Ok(defs)
}

fn build(app_name: &str, service: String, raw: RawService) -> Result<ServiceDefinition> {
    let name = format!("{app_name}_{service}");
    if name.len() > paths::MAX_NAME_LEN {
        return Err(semantic(
            &service,
            &format!(
                "scoped name '{name}' is longer than {} characters",
                paths::MAX_NAME_LEN
            ),
        ));
    }

    let image = raw
        .image
        .map(|i| i.trim().to_string())
        .filter(|i| !i.is_empty())
        .ok_or_else(|| semantic(&service, "missing required field 'image'"))?;

    let deploy = raw.deploy.unwrap_or_default();
    let replicas = match (raw.replicas, deploy.replicas) {
        (Some(_), Some(_)) => {
            return Err(semantic(
                &service,
                "replicas declared both at top level and under 'deploy'",
            ))
        }
        (Some(n), None) | (None, Some(n)) => n,
        (None, None) => 1,
    };

    // Whitespace split only; use the list form for arguments with spaces.
    let command = match raw.command {
        None => Vec::new(),
        Some(StringOrList::One(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(StringOrList::Many(v)) => v,
    };

    let environment = match raw.environment {
        None => BTreeMap::new(),
        Some(kv) => key_values(&service, "environment", kv)?,
    };

    let mut labels = match raw.labels {
        None => BTreeMap::new(),
        Some(kv) => key_values(&service, "labels", kv)?,
    };
    if let Some(kv) = deploy.labels {
        labels.extend(key_values(&service, "deploy.labels", kv)?);
    }

    let ports = raw
        .ports
        .into_iter()
        .map(|p| port(&service, p))
        .collect::<Result<Vec<_>>>()?;

    Ok(ServiceDefinition {
        name,
        service,
        image,
        replicas,
        command,
        environment,
        ports,
        labels,
    })
}

fn key_values(service: &str, field: &str, kv: KeyValues) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    match kv {
        KeyValues::Map(map) => {
            for (k, v) in map {
                let value = match v {
                    serde_yaml::Value::Null => String::new(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::String(s) => s,
                    _ => {
                        return Err(semantic(
                            service,
                            &format!("{field}.{k} must be a scalar value"),
                        ))
                    }
                };
                out.insert(k, value);
            }
        }
        KeyValues::List(items) => {
            for item in items {
                let Some((k, v)) = item.split_once('=') else {
                    return Err(semantic(
                        service,
                        &format!("{field} entry '{item}' must be KEY=VALUE"),
                    ));
                };
                if k.is_empty() {
                    return Err(semantic(
                        service,
                        &format!("{field} entry '{item}' has an empty key"),
                    ));
                }
                out.insert(k.to_string(), v.to_string());
            }
        }
    }
    Ok(out)
}

fn port(service: &str, raw: RawPort) -> Result<PortMapping> {
    let bad = |spec: &str| semantic(service, &format!("invalid port '{spec}'"));
    match raw {
        RawPort::Number(target) => Ok(PortMapping {
            published: None,
            target,
            protocol: Protocol::Tcp,
        }),
        RawPort::Long {
            target,
            published,
            protocol,
        } => {
            let protocol = match protocol {
                None => Protocol::Tcp,
                Some(p) => Protocol::parse(&p).ok_or_else(|| bad(&p))?,
            };
            Ok(PortMapping {
                published,
                target,
                protocol,
            })
        }
        RawPort::Short(spec) => {
            let (ports, protocol) = match spec.split_once('/') {
                Some((ports, proto)) => (ports, Protocol::parse(proto).ok_or_else(|| bad(&spec))?),
                None => (spec.as_str(), Protocol::Tcp),
            };
            let parts: Vec<&str> = ports.split(':').collect();
            let num = |s: &str| s.trim().parse::<u16>().map_err(|_| bad(&spec));
            match parts.as_slice() {
                [target] => Ok(PortMapping {
                    published: None,
                    target: num(target)?,
                    protocol,
                }),
                [published, target] => Ok(PortMapping {
                    published: Some(num(published)?),
                    target: num(target)?,
                    protocol,
                }),
                _ => Err(bad(&spec)),
            }
        }
    }
}

fn semantic(service: &str, reason: &str) -> MeltcdError {
    MeltcdError::ManifestSemantic {
        service: service.to_string(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
