use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::Timeouts;
use crate::error::SupervisorError;
use crate::locator::ServiceLocator;
use crate::plugin::Plugin;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Loader page requested, `LOADER_INITIALIZED` not yet seen.
    Pending,
    Ready,
}

/// The sandbox of one service and the plugin handles loaded inside it.
pub struct ServiceContext {
    service: String,
    origin: String,
    state: watch::Sender<SandboxState>,
    opened_at: Instant,
    plugins: HashMap<String, Plugin>,
    transport: Arc<dyn Transport>,
    timeouts: Timeouts,
}

impl ServiceContext {
    /// Request the sandbox for `service`. Readiness is reported later by
    /// [`ServiceContext::mark_initialized`].
    pub fn new(
        service: &str,
        locator: &dyn ServiceLocator,
        transport: Arc<dyn Transport>,
        timeouts: Timeouts,
    ) -> Result<Self, SupervisorError> {
        let origin = locator.origin(service);
        let url = locator.loader_url(service);
        transport.open_sandbox(service, &url)?;
        tracing::info!(service, url = %url, "Sandbox requested");

        let (state, _) = watch::channel(SandboxState::Pending);
        Ok(Self {
            service: service.to_string(),
            origin,
            state,
            opened_at: Instant::now(),
            plugins: HashMap::new(),
            transport,
            timeouts,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn state(&self) -> SandboxState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SandboxState::Ready
    }

    /// True once the sandbox missed its readiness window. An abandoned
    /// context is replaced by a fresh one on next use.
    pub fn is_abandoned(&self) -> bool {
        !self.is_ready() && self.opened_at.elapsed() >= self.timeouts.sandbox
    }

    /// Handle `LOADER_INITIALIZED` from `origin`. Ignored unless it comes from
    /// this service's own sandbox.
    pub fn mark_initialized(&self, origin: &str) -> bool {
        if origin != self.origin {
            tracing::warn!(
                service = %self.service,
                expected = %self.origin,
                actual = origin,
                "Ignoring loader initialization from foreign origin"
            );
            return false;
        }
        if self.state.send_replace(SandboxState::Ready) == SandboxState::Pending {
            tracing::info!(service = %self.service, "Sandbox initialized");
        }
        true
    }

    /// The handle for `plugin`, created on first use.
    pub fn load_plugin(&mut self, plugin: &str) -> Plugin {
        if let Some(existing) = self.plugins.get(plugin) {
            return existing.clone();
        }
        let handle = Plugin::new(
            &self.service,
            plugin,
            self.origin.clone(),
            self.state.subscribe(),
            self.transport.clone(),
            self.timeouts,
        );
        tracing::debug!(plugin = %handle.id(), "Plugin handle created");
        self.plugins.insert(plugin.to_string(), handle.clone());
        handle
    }

    pub fn plugin(&self, plugin: &str) -> Option<&Plugin> {
        self.plugins.get(plugin)
    }
}
