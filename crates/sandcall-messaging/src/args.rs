use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;

/// Plugin name assumed when a call does not name one.
pub const DEFAULT_PLUGIN: &str = "plugin";

fn default_plugin() -> String {
    DEFAULT_PLUGIN.into()
}

/// A plugin hosted by a service, written `<service>:<plugin>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedPluginId {
    pub service: String,
    #[serde(default = "default_plugin")]
    pub plugin: String,
}

impl QualifiedPluginId {
    pub fn new(service: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            plugin: plugin.into(),
        }
    }
}

impl std::fmt::Display for QualifiedPluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service, self.plugin)
    }
}

/// Identifies one callable function on one plugin of one service, together
/// with the arguments it is called with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedFunctionCallArgs {
    pub service: String,
    #[serde(default = "default_plugin")]
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intf: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl QualifiedFunctionCallArgs {
    pub fn new(
        service: impl Into<String>,
        plugin: impl Into<String>,
        intf: Option<&str>,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self {
            service: service.into(),
            plugin: plugin.into(),
            intf: intf.map(str::to_string),
            method: method.into(),
            params,
        }
    }

    pub fn plugin_id(&self) -> QualifiedPluginId {
        QualifiedPluginId::new(self.service.clone(), self.plugin.clone())
    }

    /// Canonical JSON of the parameters.
    ///
    /// `serde_json` objects keep their keys sorted, so equal parameter lists
    /// always produce equal strings.
    pub fn params_json(&self) -> String {
        serde_json::to_string(&self.params).unwrap_or_default()
    }

    /// Reject identities with an empty service, plugin or method.
    pub fn validate(&self, tag: &str) -> Result<(), MessageError> {
        for (field, value) in [
            ("service", &self.service),
            ("plugin", &self.plugin),
            ("method", &self.method),
        ] {
            if value.is_empty() {
                return Err(MessageError::MissingField {
                    tag: tag.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for QualifiedFunctionCallArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.intf {
            Some(intf) => write!(
                f,
                "{}:{}/{}->{}",
                self.service, self.plugin, intf, self.method
            ),
            None => write!(f, "{}:{}->{}", self.service, self.plugin, self.method),
        }
    }
}

/// The unqualified call identity echoed back to whoever issued the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallArgs {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl FunctionCallArgs {
    /// Whether this identity answers `args`. Only service and method are
    /// compared; plugins re-serialize params, so they are not part of the match.
    pub fn matches(&self, args: &QualifiedFunctionCallArgs) -> bool {
        self.service == args.service && self.method == args.method
    }
}

impl From<&QualifiedFunctionCallArgs> for FunctionCallArgs {
    fn from(args: &QualifiedFunctionCallArgs) -> Self {
        Self {
            service: args.service.clone(),
            method: args.method.clone(),
            params: args.params.clone(),
        }
    }
}
