use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::args::QualifiedFunctionCallArgs;

/// An error returned by a plugin in place of a result.
///
/// On the wire this is any object with a string `errorType` and an object
/// `val`. Only `"recoverable"` errors can be handled by a calling plugin;
/// every other error type aborts the whole call chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    #[serde(rename = "errorType")]
    pub error_type: String,
    pub val: Map<String, Value>,
}

impl ErrorResult {
    pub const UNRECOVERABLE: &'static str = "unrecoverable";
    pub const RECOVERABLE: &'static str = "recoverable";

    pub fn new(error_type: &str, message: impl Into<String>) -> Self {
        let mut val = Map::new();
        val.insert("message".into(), Value::String(message.into()));
        Self {
            error_type: error_type.to_string(),
            val,
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self::new(Self::UNRECOVERABLE, message)
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::new(Self::RECOVERABLE, message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.error_type == Self::RECOVERABLE
    }

    pub fn message(&self) -> Option<&str> {
        self.val.get("message").and_then(Value::as_str)
    }

    /// Parse `value` as an error result, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_error_result(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("errorType".into(), Value::String(self.error_type.clone()));
        object.insert("val".into(), Value::Object(self.val.clone()));
        Value::Object(object)
    }
}

impl From<ErrorResult> for Value {
    fn from(error: ErrorResult) -> Self {
        error.to_value()
    }
}

/// True iff `result` is an object with a string `errorType` and an object `val`.
pub fn is_error_result(result: &Value) -> bool {
    result.get("errorType").is_some_and(Value::is_string)
        && result.get("val").is_some_and(Value::is_object)
}

/// A memoized sub-call result, visible only to plugins of `allowed_service`.
///
/// When a nested call resolves while its caller is still on the stack, the
/// result is recorded here so the caller can be re-invoked and replay the
/// sub-call without executing it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultCache {
    pub allowed_service: String,
    pub call_service: String,
    pub call_plugin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_intf: Option<String>,
    pub call_method: String,
    pub args_json: String,
    pub result: Value,
}

impl ResultCache {
    pub fn new(
        allowed_service: impl Into<String>,
        call: &QualifiedFunctionCallArgs,
        result: Value,
    ) -> Self {
        Self {
            allowed_service: allowed_service.into(),
            call_service: call.service.clone(),
            call_plugin: call.plugin.clone(),
            call_intf: call.intf.clone(),
            call_method: call.method.clone(),
            args_json: call.params_json(),
            result,
        }
    }

    /// Whether this entry memoizes exactly `call`.
    pub fn answers(&self, call: &QualifiedFunctionCallArgs) -> bool {
        self.call_service == call.service
            && self.call_plugin == call.plugin
            && self.call_intf == call.intf
            && self.call_method == call.method
            && self.args_json == call.params_json()
    }

    /// SHA-256 over everything except the result. Two entries with the same
    /// identity memoize the same call for the same audience.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.allowed_service.as_str(),
            self.call_service.as_str(),
            self.call_plugin.as_str(),
            self.call_intf.as_deref().unwrap_or(""),
            self.call_method.as_str(),
            self.args_json.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// A side-effecting action a plugin wants submitted once the whole call
/// chain succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddableAction {
    pub service: String,
    pub action: String,
    #[serde(with = "hex_bytes")]
    pub args: Vec<u8>,
}

impl AddableAction {
    pub fn new(service: impl Into<String>, action: impl Into<String>, args: Vec<u8>) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            args,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(serde::de::Error::custom)
    }
}
