use sandcall_messaging::{Message, MessageError};
use serde_json::Value;
use thiserror::Error;

use crate::locator::ServiceLocator;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open sandbox for `{service}`: {reason}")]
    SandboxUnavailable { service: String, reason: String },

    #[error("no route to {0}")]
    Unreachable(String),

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Where an outbound message is delivered. Always carries an explicit origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The embedding application window.
    Parent { origin: String },
    /// The sandbox of one service.
    Sandbox { service: String, origin: String },
}

impl Target {
    pub fn origin(&self) -> &str {
        match self {
            Target::Parent { origin } | Target::Sandbox { origin, .. } => origin,
        }
    }
}

/// The channel between the supervisor and the other browsing contexts.
///
/// Implementations must deliver asynchronously: a message posted while the
/// supervisor is handling an inbound message is observed only after that
/// handler returns.
pub trait Transport: Send + Sync {
    /// Create the sandbox for `service` by loading `url`.
    fn open_sandbox(&self, service: &str, url: &str) -> Result<(), TransportError>;

    fn post(&self, target: &Target, message: &Message) -> Result<(), TransportError>;
}

/// A message received from another browsing context.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub origin: String,
    pub data: Value,
    /// Sent by the top-level window.
    pub from_top: bool,
    /// Sent by the window that embeds the supervisor.
    pub from_parent: bool,
}

impl Inbound {
    /// A message posted by the embedding application.
    pub fn from_application(
        origin: impl Into<String>,
        message: &Message,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            origin: origin.into(),
            data: message.to_value()?,
            from_top: true,
            from_parent: true,
        })
    }

    /// A message posted by a service sandbox.
    pub fn from_sandbox(
        origin: impl Into<String>,
        message: &Message,
    ) -> Result<Self, MessageError> {
        Ok(Self {
            origin: origin.into(),
            data: message.to_value()?,
            from_top: false,
            from_parent: false,
        })
    }

    pub fn is_from_embedder(&self) -> bool {
        self.from_top || self.from_parent
    }
}

/// Who an inbound message is from, judged by sender only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Application,
    Sandbox { service: String },
    Ignore,
}

/// Application traffic must come from the top window, which is also the
/// parent, on the root domain. Sandbox traffic must come from the origin of
/// a loaded service and never from the embedder.
pub fn classify(
    inbound: &Inbound,
    locator: &dyn ServiceLocator,
    is_loaded: impl Fn(&str) -> bool,
) -> Route {
    if inbound.from_top && inbound.from_parent {
        if locator.is_root_domain(&inbound.origin) {
            return Route::Application;
        }
        return Route::Ignore;
    }
    if inbound.is_from_embedder() {
        return Route::Ignore;
    }
    match locator.service_of(&inbound.origin) {
        Some(service) if is_loaded(&service) => Route::Sandbox { service },
        _ => Route::Ignore,
    }
}
