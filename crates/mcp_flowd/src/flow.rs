//! Flow records, derived transports, and write-time validation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FlowdError;

/// Protocol family of a flow endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    Stdio,
    #[default]
    Sse,
    StreamableHttp,
    Openapi,
}

/// Wire transport spoken on a gateway port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    #[default]
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "streamablehttp")]
    StreamableHttp,
}

/// One header forwarded to an upstream endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// Snapshot of fields captured when an update replaces them.
///
/// Round-tripped through the store; the supervisor never interprets it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousConfig {
    #[serde(default)]
    pub sse_url: Option<String>,
    #[serde(default)]
    pub transport: Option<Transport>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub server_transport: Option<Transport>,
}

/// Operator-declared mapping from a source endpoint to a target endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    /// URL path segment the flow is exposed under; defaults to `name`.
    pub route: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_type: EndpointType,
    pub target_type: EndpointType,
    #[serde(default)]
    pub sse_url: Option<String>,
    #[serde(default)]
    pub openapi_base_url: Option<String>,
    #[serde(default)]
    pub openapi_spec_url: Option<String>,
    /// Derived from `source_type`; recomputed on every write.
    pub transport: Transport,
    /// Derived from `source_type`/`target_type`; recomputed on every write.
    pub server_transport: Transport,
    #[serde(default)]
    pub stateless: bool,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub previous: PreviousConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Base server key used in gateway configs before collision suffixing.
    pub fn server_key_base(&self) -> &str {
        if !self.route.is_empty() {
            &self.route
        } else if !self.name.is_empty() {
            &self.name
        } else {
            "default"
        }
    }

    /// True when either end of the flow is a local child process.
    pub fn is_stdio_bridge(&self) -> bool {
        self.source_type == EndpointType::Stdio || self.target_type == EndpointType::Stdio
    }
}

/// Caller-supplied record for create and update operations.
///
/// `transport`/`server_transport`, the route default, timestamps, and the
/// `previous` snapshot are all derived by the supervisor on write.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_type: EndpointType,
    #[serde(default)]
    pub target_type: EndpointType,
    #[serde(default)]
    pub sse_url: Option<String>,
    #[serde(default)]
    pub openapi_base_url: Option<String>,
    #[serde(default)]
    pub openapi_spec_url: Option<String>,
    #[serde(default)]
    pub stateless: bool,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

impl FlowDraft {
    /// Enforces the write-time invariants.
    pub fn validate(&self) -> Result<(), FlowdError> {
        if self.source_type == EndpointType::Openapi {
            if self.target_type != EndpointType::StreamableHttp {
                return Err(FlowdError::OpenapiTargetMismatch);
            }
            if non_empty(&self.openapi_base_url).is_none()
                || non_empty(&self.openapi_spec_url).is_none()
            {
                return Err(FlowdError::OpenapiUrlsRequired);
            }
        }
        if (self.source_type == EndpointType::Stdio || self.target_type == EndpointType::Stdio)
            && non_empty(&self.command).is_none()
        {
            return Err(FlowdError::CommandRequired);
        }
        if matches!(
            self.source_type,
            EndpointType::Sse | EndpointType::StreamableHttp
        ) && non_empty(&self.sse_url).is_none()
        {
            return Err(FlowdError::UrlRequired);
        }
        Ok(())
    }

    /// Builds the stored record, deriving route and transports.
    pub(crate) fn materialize(
        self,
        id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Flow {
        let route = self
            .route
            .as_deref()
            .map(str::trim)
            .filter(|route| !route.is_empty())
            .unwrap_or(&self.name)
            .to_string();
        Flow {
            id,
            route,
            transport: derived_transport(self.source_type),
            server_transport: derived_server_transport(self.source_type, self.target_type),
            name: self.name,
            description: self.description,
            source_type: self.source_type,
            target_type: self.target_type,
            sse_url: self.sse_url,
            openapi_base_url: self.openapi_base_url,
            openapi_spec_url: self.openapi_spec_url,
            stateless: self.stateless,
            auto_start: self.auto_start,
            command: self.command,
            args: self.args,
            env: self.env,
            headers: self.headers,
            allow_origins: self.allow_origins,
            previous: PreviousConfig::default(),
            created_at,
            updated_at,
        }
    }
}

/// Client-side transport implied by the source endpoint.
pub(crate) fn derived_transport(source: EndpointType) -> Transport {
    match source {
        EndpointType::StreamableHttp | EndpointType::Openapi => Transport::StreamableHttp,
        _ => Transport::Sse,
    }
}

/// Transport exposed on the gateway port for a source/target pair.
pub(crate) fn derived_server_transport(source: EndpointType, target: EndpointType) -> Transport {
    if target == EndpointType::StreamableHttp
        || (target == EndpointType::Stdio && source == EndpointType::StreamableHttp)
    {
        Transport::StreamableHttp
    } else {
        Transport::Sse
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_draft() -> FlowDraft {
        FlowDraft {
            name: "echo".into(),
            source_type: EndpointType::Stdio,
            target_type: EndpointType::Sse,
            command: Some("/bin/echo".into()),
            ..FlowDraft::default()
        }
    }

    #[test]
    fn stdio_endpoints_require_a_command() {
        let mut draft = stdio_draft();
        draft.command = None;
        assert!(matches!(
            draft.validate(),
            Err(FlowdError::CommandRequired)
        ));
        draft.command = Some("  ".into());
        assert!(matches!(
            draft.validate(),
            Err(FlowdError::CommandRequired)
        ));
    }

    #[test]
    fn remote_sources_require_a_url() {
        let draft = FlowDraft {
            name: "remote".into(),
            source_type: EndpointType::Sse,
            target_type: EndpointType::Sse,
            ..FlowDraft::default()
        };
        assert!(matches!(draft.validate(), Err(FlowdError::UrlRequired)));
    }

    #[test]
    fn openapi_sources_must_target_streamable_http() {
        let draft = FlowDraft {
            name: "petstore".into(),
            source_type: EndpointType::Openapi,
            target_type: EndpointType::Sse,
            openapi_base_url: Some("http://api.example".into()),
            openapi_spec_url: Some("http://api.example/openapi.json".into()),
            ..FlowDraft::default()
        };
        assert!(matches!(
            draft.validate(),
            Err(FlowdError::OpenapiTargetMismatch)
        ));
    }

    #[test]
    fn openapi_sources_require_both_urls() {
        let draft = FlowDraft {
            name: "petstore".into(),
            source_type: EndpointType::Openapi,
            target_type: EndpointType::StreamableHttp,
            openapi_base_url: Some("http://api.example".into()),
            ..FlowDraft::default()
        };
        assert!(matches!(
            draft.validate(),
            Err(FlowdError::OpenapiUrlsRequired)
        ));
    }

    #[test]
    fn transports_derive_from_endpoint_pairs() {
        assert_eq!(
            derived_transport(EndpointType::Openapi),
            Transport::StreamableHttp
        );
        assert_eq!(derived_transport(EndpointType::Sse), Transport::Sse);
        assert_eq!(
            derived_server_transport(EndpointType::StreamableHttp, EndpointType::Stdio),
            Transport::StreamableHttp
        );
        assert_eq!(
            derived_server_transport(EndpointType::Sse, EndpointType::Stdio),
            Transport::Sse
        );
        assert_eq!(
            derived_server_transport(EndpointType::Stdio, EndpointType::StreamableHttp),
            Transport::StreamableHttp
        );
    }

    #[test]
    fn route_defaults_to_the_name() {
        let now = Utc::now();
        let flow = stdio_draft().materialize("f1".into(), now, now);
        assert_eq!(flow.route, "echo");
        assert_eq!(flow.server_key_base(), "echo");
    }
}
