//! Message envelopes for the sandcall call orchestration protocol.
//!
//! Every value that crosses a browsing-context boundary is one of the
//! [`Message`] variants: a `type` discriminator plus a `payload`. The crate is
//! pure data and validation; the supervisor crate owns all behavior.
//!
//! ```rust
//! use sandcall_messaging::{Message, QualifiedFunctionCallArgs};
//!
//! let args = QualifiedFunctionCallArgs::new("tokens", "plugin", None, "balance", vec![]);
//! let request = Message::function_call_request(args);
//! let wire = request.to_value().unwrap();
//!
//! assert!(sandcall_messaging::is_function_call_request(&wire));
//! assert_eq!(Message::decode(&wire).unwrap(), Some(request));
//! ```

pub mod args;
pub mod error;
pub mod message;
pub mod result;

pub use args::{DEFAULT_PLUGIN, FunctionCallArgs, QualifiedFunctionCallArgs, QualifiedPluginId};
pub use error::MessageError;
pub use message::{
    FunctionCallRequest, FunctionCallResponse, Message, PluginCallRequest, PluginCallResponse,
    PluginSyncCall, PreLoadPluginsRequest, PreloadComplete, PreloadStart, is_function_call_request,
    is_function_call_response, is_loader_initialized, is_plugin_call_request,
    is_plugin_call_response, is_plugin_sync_call, is_preload_complete,
    is_preload_plugins_request, is_preload_start, tags,
};
pub use result::{AddableAction, ErrorResult, ResultCache, is_error_result};
