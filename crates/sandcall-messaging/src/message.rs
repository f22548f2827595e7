use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::args::{FunctionCallArgs, QualifiedFunctionCallArgs, QualifiedPluginId};
use crate::error::MessageError;
use crate::result::{AddableAction, ResultCache, is_error_result};

/// Discriminator values carried in each envelope's `type` field.
pub mod tags {
    pub const FUNCTION_CALL_REQUEST: &str = "FUNCTION_CALL_REQUEST";
    pub const FUNCTION_CALL_RESPONSE: &str = "FUNCTION_CALL_RESPONSE";
    pub const PRELOAD_PLUGINS_REQUEST: &str = "PRELOAD_PLUGINS_REQUEST";
    pub const PLUGIN_CALL_REQUEST: &str = "PLUGIN_CALL_REQUEST";
    pub const PLUGIN_CALL_RESPONSE: &str = "PLUGIN_CALL_RESPONSE";
    pub const PLUGIN_SYNC_CALL: &str = "PLUGIN_SYNC_CALL";
    pub const LOADER_INITIALIZED: &str = "LOADER_INITIALIZED";
    pub const PRELOAD_START: &str = "PRELOAD_START";
    pub const PRELOAD_COMPLETE: &str = "PRELOAD_COMPLETE";

    pub const ALL: [&str; 9] = [
        FUNCTION_CALL_REQUEST,
        FUNCTION_CALL_RESPONSE,
        PRELOAD_PLUGINS_REQUEST,
        PLUGIN_CALL_REQUEST,
        PLUGIN_CALL_RESPONSE,
        PLUGIN_SYNC_CALL,
        LOADER_INITIALIZED,
        PRELOAD_START,
        PRELOAD_COMPLETE,
    ];
}

/// App -> supervisor: call a plugin function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    pub id: String,
    pub args: QualifiedFunctionCallArgs,
}

impl FunctionCallRequest {
    /// Build a request with a fresh random id.
    pub fn new(args: QualifiedFunctionCallArgs) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            args,
        }
    }
}

/// Supervisor -> app: the single reply to a [`FunctionCallRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub id: String,
    pub call: FunctionCallArgs,
    pub result: Value,
}

impl FunctionCallResponse {
    pub fn is_error(&self) -> bool {
        is_error_result(&self.result)
    }
}

/// App -> supervisor: warm up the sandboxes of these services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreLoadPluginsRequest {
    pub services: Vec<String>,
}

/// Supervisor -> sandbox: run one plugin function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCallRequest {
    pub caller: String,
    pub args: QualifiedFunctionCallArgs,
    #[serde(default)]
    pub result_cache: Vec<ResultCache>,
}

/// Sandbox -> supervisor: the plugin finished the call it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginCallResponse {
    pub call: FunctionCallArgs,
    pub result: Value,
    #[serde(default)]
    pub actions: Vec<AddableAction>,
}

/// Sandbox -> supervisor: the running plugin needs the result of another
/// plugin's function before it can finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSyncCall {
    pub args: QualifiedFunctionCallArgs,
}

/// Supervisor -> sandbox: load these plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadStart {
    pub plugins: Vec<String>,
}

/// Sandbox -> supervisor: a plugin is loaded and depends on these plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadComplete {
    pub plugin: String,
    #[serde(default)]
    pub dependencies: Vec<QualifiedPluginId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    FunctionCallRequest(FunctionCallRequest),
    FunctionCallResponse(FunctionCallResponse),
    PreloadPluginsRequest(PreLoadPluginsRequest),
    PluginCallRequest(PluginCallRequest),
    PluginCallResponse(PluginCallResponse),
    PluginSyncCall(PluginSyncCall),
    LoaderInitialized,
    PreloadStart(PreloadStart),
    PreloadComplete(PreloadComplete),
}

impl Message {
    pub fn tag(&self) -> &'static str {
        match self {
            Message::FunctionCallRequest(_) => tags::FUNCTION_CALL_REQUEST,
            Message::FunctionCallResponse(_) => tags::FUNCTION_CALL_RESPONSE,
            Message::PreloadPluginsRequest(_) => tags::PRELOAD_PLUGINS_REQUEST,
            Message::PluginCallRequest(_) => tags::PLUGIN_CALL_REQUEST,
            Message::PluginCallResponse(_) => tags::PLUGIN_CALL_RESPONSE,
            Message::PluginSyncCall(_) => tags::PLUGIN_SYNC_CALL,
            Message::LoaderInitialized => tags::LOADER_INITIALIZED,
            Message::PreloadStart(_) => tags::PRELOAD_START,
            Message::PreloadComplete(_) => tags::PRELOAD_COMPLETE,
        }
    }

    /// Decode an inbound value.
    ///
    /// Returns `Ok(None)` when the value is not one of our envelopes and
    /// `Err` when it carries one of our tags but is malformed.
    pub fn decode(value: &Value) -> Result<Option<Self>, MessageError> {
        let Some(tag) = message_tag(value) else {
            return Ok(None);
        };
        if !tags::ALL.contains(&tag) {
            return Ok(None);
        }
        if tag == tags::PLUGIN_CALL_REQUEST {
            is_plugin_call_request(value)?;
        }

        let message: Message =
            serde_json::from_value(value.clone()).map_err(|e| MessageError::Malformed {
                tag: tag.to_string(),
                reason: e.to_string(),
            })?;
        message.validate()?;
        Ok(Some(message))
    }

    /// Reject call identities that name no service, plugin or method.
    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            Message::FunctionCallRequest(request) => request.args.validate(self.tag()),
            Message::PluginCallRequest(request) => request.args.validate(self.tag()),
            Message::PluginSyncCall(call) => call.args.validate(self.tag()),
            _ => Ok(()),
        }
    }

    pub fn to_value(&self) -> Result<Value, MessageError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn function_call_request(args: QualifiedFunctionCallArgs) -> Self {
        Message::FunctionCallRequest(FunctionCallRequest::new(args))
    }

    pub fn function_call_response(
        id: impl Into<String>,
        call: FunctionCallArgs,
        result: Value,
    ) -> Self {
        Message::FunctionCallResponse(FunctionCallResponse {
            id: id.into(),
            call,
            result,
        })
    }

    pub fn preload_plugins_request(services: Vec<String>) -> Self {
        Message::PreloadPluginsRequest(PreLoadPluginsRequest { services })
    }

    pub fn plugin_call_request(
        caller: impl Into<String>,
        args: QualifiedFunctionCallArgs,
        result_cache: Vec<ResultCache>,
    ) -> Self {
        Message::PluginCallRequest(PluginCallRequest {
            caller: caller.into(),
            args,
            result_cache,
        })
    }

    pub fn plugin_call_response(
        call: FunctionCallArgs,
        result: Value,
        actions: Vec<AddableAction>,
    ) -> Self {
        Message::PluginCallResponse(PluginCallResponse {
            call,
            result,
            actions,
        })
    }

    pub fn plugin_sync_call(args: QualifiedFunctionCallArgs) -> Self {
        Message::PluginSyncCall(PluginSyncCall { args })
    }

    pub fn loader_initialized() -> Self {
        Message::LoaderInitialized
    }

    pub fn preload_start(plugins: Vec<String>) -> Self {
        Message::PreloadStart(PreloadStart { plugins })
    }

    pub fn preload_complete(
        plugin: impl Into<String>,
        dependencies: Vec<QualifiedPluginId>,
    ) -> Self {
        Message::PreloadComplete(PreloadComplete {
            plugin: plugin.into(),
            dependencies,
        })
    }
}

fn message_tag(value: &Value) -> Option<&str> {
    value.get("type")?.as_str()
}

fn has_tag(value: &Value, tag: &str) -> bool {
    message_tag(value) == Some(tag)
}

pub fn is_function_call_request(value: &Value) -> bool {
    has_tag(value, tags::FUNCTION_CALL_REQUEST)
}

pub fn is_function_call_response(value: &Value) -> bool {
    has_tag(value, tags::FUNCTION_CALL_RESPONSE)
}

pub fn is_preload_plugins_request(value: &Value) -> bool {
    has_tag(value, tags::PRELOAD_PLUGINS_REQUEST)
}

pub fn is_plugin_call_response(value: &Value) -> bool {
    has_tag(value, tags::PLUGIN_CALL_RESPONSE)
}

pub fn is_plugin_sync_call(value: &Value) -> bool {
    has_tag(value, tags::PLUGIN_SYNC_CALL)
}

pub fn is_loader_initialized(value: &Value) -> bool {
    has_tag(value, tags::LOADER_INITIALIZED)
}

pub fn is_preload_start(value: &Value) -> bool {
    has_tag(value, tags::PRELOAD_START)
}

pub fn is_preload_complete(value: &Value) -> bool {
    has_tag(value, tags::PRELOAD_COMPLETE)
}

/// Schema-validating guard for plugin call requests.
///
/// `Ok(false)` means the value is some other message; an error means it is
/// tagged as a plugin call request but its args do not name a service,
/// plugin and method.
pub fn is_plugin_call_request(value: &Value) -> Result<bool, MessageError> {
    if !has_tag(value, tags::PLUGIN_CALL_REQUEST) {
        return Ok(false);
    }

    let args = value
        .get("payload")
        .and_then(|payload| payload.get("args"))
        .ok_or_else(|| MessageError::MissingField {
            tag: tags::PLUGIN_CALL_REQUEST.into(),
            field: "args".into(),
        })?;

    for field in ["service", "plugin", "method"] {
        let present = args
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.is_empty());
        if !present {
            return Err(MessageError::MissingField {
                tag: tags::PLUGIN_CALL_REQUEST.into(),
                field: format!("args.{field}"),
            });
        }
    }
    Ok(true)
}
