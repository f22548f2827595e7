use std::sync::Arc;

use sandcall_messaging::{Message, QualifiedFunctionCallArgs, QualifiedPluginId, ResultCache};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::call_context::ChainTicket;
use crate::config::Timeouts;
use crate::error::SupervisorError;
use crate::host::HostInterface;
use crate::service_context::SandboxState;
use crate::transport::{Inbound, Target, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Uninitialized,
    /// `PRELOAD_START` sent, waiting for `PRELOAD_COMPLETE`.
    AwaitingPreload,
    Ready,
}

/// Handle to one plugin inside a service sandbox.
///
/// Cheap to clone; clones share readiness state.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

struct PluginInner {
    id: QualifiedPluginId,
    origin: String,
    sandbox: watch::Receiver<SandboxState>,
    state: watch::Sender<PluginState>,
    transport: Arc<dyn Transport>,
    timeouts: Timeouts,
}

impl Plugin {
    pub(crate) fn new(
        service: &str,
        plugin: &str,
        origin: String,
        sandbox: watch::Receiver<SandboxState>,
        transport: Arc<dyn Transport>,
        timeouts: Timeouts,
    ) -> Self {
        let (state, _) = watch::channel(PluginState::Uninitialized);
        Self {
            inner: Arc::new(PluginInner {
                id: QualifiedPluginId::new(service, plugin),
                origin,
                sandbox,
                state,
                transport,
                timeouts,
            }),
        }
    }

    pub fn id(&self) -> &QualifiedPluginId {
        &self.inner.id
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn state(&self) -> PluginState {
        *self.inner.state.borrow()
    }

    pub fn same_handle(&self, other: &Plugin) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn target(&self) -> Target {
        Target::Sandbox {
            service: self.inner.id.service.clone(),
            origin: self.inner.origin.clone(),
        }
    }

    /// Wait for the sandbox, then run the preload handshake once.
    pub async fn ready(&self) -> Result<(), SupervisorError> {
        let mut sandbox = self.inner.sandbox.clone();
        let service = &self.inner.id.service;
        let initialized = timeout(
            self.inner.timeouts.sandbox,
            sandbox.wait_for(|s| *s == SandboxState::Ready),
        )
        .await
        .map(|ready| ready.map(|_| ()));
        match initialized {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(SupervisorError::SandboxClosed {
                    service: service.clone(),
                });
            }
            Err(_) => {
                return Err(SupervisorError::SandboxTimeout {
                    service: service.clone(),
                    timeout_ms: self.inner.timeouts.sandbox.as_millis() as u64,
                });
            }
        }

        let started = self.inner.state.send_if_modified(|state| {
            if *state == PluginState::Uninitialized {
                *state = PluginState::AwaitingPreload;
                true
            } else {
                false
            }
        });
        if started {
            tracing::debug!(plugin = %self.inner.id, "Preload started");
            let message = Message::preload_start(vec![self.inner.id.plugin.clone()]);
            if let Err(e) = self.inner.transport.post(&self.target(), &message) {
                self.inner.state.send_replace(PluginState::Uninitialized);
                return Err(e.into());
            }
        }

        let mut state = self.inner.state.subscribe();
        let preloaded = timeout(
            self.inner.timeouts.preload,
            state.wait_for(|s| *s == PluginState::Ready),
        )
        .await
        .map(|ready| ready.map(|_| ()));
        match preloaded {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => {
                // The next caller starts the handshake over.
                self.inner.state.send_if_modified(|state| {
                    if *state == PluginState::AwaitingPreload {
                        *state = PluginState::Uninitialized;
                        true
                    } else {
                        false
                    }
                });
                Err(SupervisorError::PreloadTimeout {
                    plugin: self.inner.id.clone(),
                    timeout_ms: self.inner.timeouts.preload.as_millis() as u64,
                })
            }
        }
    }

    /// Ask the sandbox to run `method` with the cache entries in `memory`.
    ///
    /// Resolves once the request is posted; the result arrives later as a
    /// `PLUGIN_CALL_RESPONSE`. Nothing is posted if the chain behind `ticket`
    /// ended while the plugin was getting ready.
    pub async fn call(
        &self,
        caller: &str,
        intf: Option<&str>,
        method: &str,
        params: Vec<Value>,
        memory: Vec<ResultCache>,
        ticket: &ChainTicket,
    ) -> Result<(), SupervisorError> {
        self.ready().await?;

        let args = QualifiedFunctionCallArgs::new(
            self.inner.id.service.clone(),
            self.inner.id.plugin.clone(),
            intf,
            method,
            params,
        );
        let posted = ticket.while_current(|| {
            tracing::debug!(call = %args, cached = memory.len(), "Plugin call posted");
            let message = Message::plugin_call_request(caller, args.clone(), memory);
            self.inner.transport.post(&self.target(), &message)
        });
        match posted {
            Some(result) => result.map_err(Into::into),
            None => {
                tracing::debug!(
                    call = %args,
                    generation = ticket.generation(),
                    "Dropping call for finished chain"
                );
                Ok(())
            }
        }
    }

    fn mark_ready(&self) {
        if self.inner.state.send_replace(PluginState::Ready) != PluginState::Ready {
            tracing::info!(plugin = %self.inner.id, "Plugin ready");
        }
    }

    /// Handle a message from this plugin's sandbox, forwarding it to `host`.
    pub fn on_message(
        &self,
        inbound: &Inbound,
        message: Message,
        host: &mut dyn HostInterface,
    ) -> Result<(), SupervisorError> {
        if inbound.is_from_embedder() {
            tracing::warn!(
                plugin = %self.inner.id,
                "Ignoring plugin message from embedding window"
            );
            return Ok(());
        }
        if inbound.origin != self.inner.origin {
            tracing::warn!(
                plugin = %self.inner.id,
                origin = %inbound.origin,
                "Ignoring plugin message from foreign origin"
            );
            return Ok(());
        }

        let origin = self.inner.origin.as_str();
        match message {
            Message::PluginCallResponse(response) => {
                host.add_actions(origin, response.actions)?;
                host.set_result(origin, &response.call, response.result)
            }
            Message::PluginSyncCall(sync) => host.sync_call(origin, sync.args),
            Message::PreloadComplete(complete) if complete.plugin == self.inner.id.plugin => {
                self.mark_ready();
                host.register_dependencies(origin, &self.inner.id, complete.dependencies)
            }
            other => {
                tracing::debug!(
                    plugin = %self.inner.id,
                    tag = other.tag(),
                    "Unhandled plugin message"
                );
                Ok(())
            }
        }
    }
}
