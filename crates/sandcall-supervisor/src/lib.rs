//! Cross-context call orchestration.
//!
//! The [`Supervisor`] sits between a root application and a set of plugin
//! sandboxes, one per service. It resolves one call chain at a time: the
//! root call and every nested call a plugin makes while running live on a
//! [`CallStack`]. A plugin that needs a sub-call result asks for it and is
//! later re-invoked with the result in its cache. When the root call
//! resolves, the actions collected along the way are submitted as one
//! transaction and the result is replied to the application.

pub mod call_context;
pub mod call_stack;
pub mod config;
pub mod error;
pub mod host;
pub mod locator;
pub mod metrics;
pub mod plugin;
pub mod service_context;
pub mod sim;
pub mod submit;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod testing;

pub use call_context::{CallContext, ChainTicket, PopOutcome, RootApp};
pub use call_stack::{Call, CallStack};
pub use config::{SupervisorConfig, Timeouts};
pub use error::{ConfigError, SupervisorError};
pub use host::{AppInterface, HostInterface};
pub use locator::{ServiceLocator, SiblingDomain};
pub use metrics::{MetricsSnapshot, SupervisorMetrics};
pub use plugin::{Plugin, PluginState};
pub use service_context::{SandboxState, ServiceContext};
pub use sim::{MethodScript, PluginScript, Simulation, SimulationChannels};
pub use submit::{
    ChainSubmitter, RecordingSubmitter, SubmitError, Submitter, Transaction, TransactionService,
    TxReceipt,
};
pub use supervisor::{Supervisor, SupervisorEvent};
pub use transport::{Inbound, Route, Target, Transport, TransportError};
