use sandcall_messaging::{MessageError, QualifiedPluginId};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while orchestrating a call chain.
///
/// Every variant except [`SupervisorError::RootOriginMismatch`] and
/// [`SupervisorError::ResolutionInProgress`] is fatal to the active chain:
/// the root application receives an error reply and the context resets.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("origin violation: expected {expected}, got {actual}")]
    OriginViolation { expected: String, actual: String },

    #[error("supervisor is bound to root application {bound}; rejected call from {caller}")]
    RootOriginMismatch { bound: String, caller: String },

    #[error("a call chain is already resolving for {origin}")]
    ResolutionInProgress { origin: String },

    #[error("plugin calls are only allowed while a call chain is active")]
    NoActiveChain,

    #[error("call stack underflow: result delivered with no call outstanding")]
    StackUnderflow,

    #[error("reply mismatch: expected a result for {expected}, got {actual}")]
    ReplyMismatch { expected: String, actual: String },

    #[error("sandbox for service `{service}` did not initialize within {timeout_ms}ms")]
    SandboxTimeout { service: String, timeout_ms: u64 },

    #[error("sandbox for service `{service}` was closed before it initialized")]
    SandboxClosed { service: String },

    #[error("plugin {plugin} did not finish preloading within {timeout_ms}ms")]
    PreloadTimeout {
        plugin: QualifiedPluginId,
        timeout_ms: u64,
    },

    #[error("call {call} did not resolve within {timeout_ms}ms")]
    CallTimeout { call: String, timeout_ms: u64 },

    #[error("service `{0}` is provided by the host and cannot be called through a sandbox")]
    HostService(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
