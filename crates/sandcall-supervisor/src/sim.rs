//! In-memory sandboxes driven by scripts.
//!
//! Every service sandbox is simulated by the transport itself: it answers
//! the loader and preload handshakes and runs scripted plugin methods. A
//! method issues its nested calls one at a time, replaying any call already
//! answered by the result cache it was given, and finally returns its result
//! and actions.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use sandcall_messaging::{
    AddableAction, DEFAULT_PLUGIN, ErrorResult, FunctionCallArgs, FunctionCallResponse, Message,
    PluginCallRequest, QualifiedFunctionCallArgs, QualifiedPluginId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::locator::ServiceLocator;
use crate::transport::{Inbound, Target, Transport, TransportError};

fn default_plugin() -> String {
    DEFAULT_PLUGIN.into()
}

/// What one plugin method does when invoked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodScript {
    /// Nested calls, issued in order.
    #[serde(default)]
    pub calls: Vec<QualifiedFunctionCallArgs>,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub actions: Vec<AddableAction>,
    /// Returned in place of `result` once all nested calls are answered.
    #[serde(default)]
    pub error: Option<ErrorResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginScript {
    pub service: String,
    #[serde(default = "default_plugin")]
    pub plugin: String,
    /// Reported in `PRELOAD_COMPLETE`.
    #[serde(default)]
    pub dependencies: Vec<QualifiedPluginId>,
    #[serde(default)]
    pub methods: HashMap<String, MethodScript>,
}

impl PluginScript {
    pub fn id(&self) -> QualifiedPluginId {
        QualifiedPluginId::new(self.service.clone(), self.plugin.clone())
    }
}

/// Receivers for everything the simulation emits.
pub struct SimulationChannels {
    /// Messages for the supervisor; hand to [`crate::Supervisor::run`].
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Replies posted to the root application.
    pub replies: mpsc::UnboundedReceiver<FunctionCallResponse>,
}

pub struct Simulation {
    locator: Box<dyn ServiceLocator>,
    plugins: HashMap<QualifiedPluginId, PluginScript>,
    unresponsive: HashSet<String>,
    inbound: mpsc::UnboundedSender<Inbound>,
    replies: mpsc::UnboundedSender<FunctionCallResponse>,
    invocations: Mutex<Vec<PluginCallRequest>>,
}

impl Simulation {
    pub fn new(
        locator: impl ServiceLocator + 'static,
        scripts: Vec<PluginScript>,
    ) -> (Self, SimulationChannels) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let plugins = scripts
            .into_iter()
            .map(|script| (script.id(), script))
            .collect();
        let simulation = Self {
            locator: Box::new(locator),
            plugins,
            unresponsive: HashSet::new(),
            inbound: inbound_tx,
            replies: replies_tx,
            invocations: Mutex::new(Vec::new()),
        };
        (
            simulation,
            SimulationChannels {
                inbound: inbound_rx,
                replies: replies_rx,
            },
        )
    }

    /// Sandboxes of `service` never report `LOADER_INITIALIZED`.
    pub fn with_unresponsive(mut self, service: impl Into<String>) -> Self {
        self.unresponsive.insert(service.into());
        self
    }

    /// Post `message` to the supervisor as the root application at `origin`.
    pub fn send_from_application(
        &self,
        origin: &str,
        message: &Message,
    ) -> Result<(), TransportError> {
        let inbound = Inbound::from_application(origin, message)?;
        self.inbound
            .send(inbound)
            .map_err(|_| TransportError::Unreachable("supervisor".into()))
    }

    /// Every plugin call request the sandboxes received, in order.
    pub fn invocations(&self) -> Vec<PluginCallRequest> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn deliver(&self, service: &str, message: Message) -> Result<(), TransportError> {
        let inbound = Inbound::from_sandbox(self.locator.origin(service), &message)?;
        self.inbound
            .send(inbound)
            .map_err(|_| TransportError::Unreachable("supervisor".into()))
    }

    fn on_sandbox_message(&self, service: &str, message: &Message) -> Result<(), TransportError> {
        match message {
            Message::PreloadStart(start) => {
                for plugin in &start.plugins {
                    let dependencies = self
                        .plugins
                        .get(&QualifiedPluginId::new(service, plugin.as_str()))
                        .map(|script| script.dependencies.clone())
                        .unwrap_or_default();
                    let complete = Message::preload_complete(plugin.as_str(), dependencies);
                    self.deliver(service, complete)?;
                }
                Ok(())
            }
            Message::PluginCallRequest(request) => {
                let reply = self.execute(request);
                self.deliver(service, reply)
            }
            other => {
                tracing::debug!(service, tag = other.tag(), "Sandbox ignored message");
                Ok(())
            }
        }
    }

    fn execute(&self, request: &PluginCallRequest) -> Message {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let call = FunctionCallArgs::from(&request.args);
        let id = request.args.plugin_id();
        let Some(script) = self
            .plugins
            .get(&id)
            .and_then(|plugin| plugin.methods.get(&request.args.method))
        else {
            let error = ErrorResult::unrecoverable(format!(
                "{} has no method `{}`",
                id, request.args.method
            ));
            return Message::plugin_call_response(call, error.to_value(), Vec::new());
        };

        let pending = script
            .calls
            .iter()
            .find(|nested| !request.result_cache.iter().any(|entry| entry.answers(nested)));
        if let Some(nested) = pending {
            return Message::plugin_sync_call(nested.clone());
        }

        match &script.error {
            Some(error) => Message::plugin_call_response(call, error.to_value(), Vec::new()),
            None => {
                Message::plugin_call_response(call, script.result.clone(), script.actions.clone())
            }
        }
    }
}

impl Transport for Simulation {
    fn open_sandbox(&self, service: &str, url: &str) -> Result<(), TransportError> {
        tracing::debug!(service, url, "Simulated sandbox opened");
        if self.unresponsive.contains(service) {
            return Ok(());
        }
        self.deliver(service, Message::loader_initialized())
    }

    fn post(&self, target: &Target, message: &Message) -> Result<(), TransportError> {
        match target {
            Target::Parent { .. } => {
                if let Message::FunctionCallResponse(response) = message {
                    self.replies
                        .send(response.clone())
                        .map_err(|_| TransportError::Unreachable(target.origin().into()))?;
                }
                Ok(())
            }
            Target::Sandbox { service, .. } => self.on_sandbox_message(service, message),
        }
    }
}
