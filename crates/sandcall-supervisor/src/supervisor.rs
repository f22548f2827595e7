use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sandcall_messaging::{
    AddableAction, DEFAULT_PLUGIN, ErrorResult, FunctionCallArgs, FunctionCallRequest, Message,
    PreLoadPluginsRequest, QualifiedFunctionCallArgs, QualifiedPluginId,
};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::call_context::{CallContext, PopOutcome, RootApp};
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::host::{AppInterface, HostInterface};
use crate::locator::{ServiceLocator, SiblingDomain};
use crate::metrics::SupervisorMetrics;
use crate::plugin::{Plugin, PluginState};
use crate::service_context::ServiceContext;
use crate::submit::Submitter;
use crate::transport::{self, Inbound, Route, Target, Transport};

/// Completions of work the supervisor spawned. Each carries the chain
/// generation it was started under; events from an earlier chain are dropped.
#[derive(Debug)]
pub enum SupervisorEvent {
    DispatchFailed {
        generation: u64,
        error: SupervisorError,
    },
    CallDeadline {
        generation: u64,
        depth: usize,
        started: DateTime<Utc>,
    },
}

/// Routes calls between the root application and plugin sandboxes.
///
/// Resolves one call chain at a time. All state is owned by the event loop
/// in [`Supervisor::run`]; spawned tasks report back through events.
pub struct Supervisor {
    config: SupervisorConfig,
    locator: Arc<dyn ServiceLocator>,
    transport: Arc<dyn Transport>,
    submitter: Arc<dyn Submitter>,
    metrics: Arc<SupervisorMetrics>,
    context: CallContext,
    services: HashMap<String, ServiceContext>,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        transport: Arc<dyn Transport>,
        submitter: Arc<dyn Submitter>,
    ) -> Self {
        let locator: Arc<dyn ServiceLocator> = Arc::new(SiblingDomain::from_config(&config));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            context: CallContext::new(locator.clone()),
            config,
            locator,
            transport,
            submitter,
            metrics: Arc::new(SupervisorMetrics::new()),
            services: HashMap::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn with_locator(mut self, locator: Arc<dyn ServiceLocator>) -> Self {
        self.context = CallContext::new(locator.clone());
        self.locator = locator;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SupervisorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<SupervisorMetrics> {
        self.metrics.clone()
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }

    pub fn service_context(&self, service: &str) -> Option<&ServiceContext> {
        self.services.get(service)
    }

    /// Process inbound messages and internal events until `inbound` closes.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        let Some(mut events) = self.events_rx.take() else {
            tracing::error!("Supervisor event loop already started");
            return;
        };
        tracing::info!(
            root_domain = %self.config.root_domain,
            "Supervisor listening"
        );

        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(message) => self.on_inbound(message),
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }

        tracing::info!("Supervisor shutting down");
    }

    /// Classify, decode and dispatch one inbound message.
    pub fn on_inbound(&mut self, inbound: Inbound) {
        let route = transport::classify(&inbound, self.locator.as_ref(), |service| {
            self.services.contains_key(service)
        });
        if route == Route::Ignore {
            tracing::trace!(origin = %inbound.origin, "Ignoring message from unknown sender");
            return;
        }

        let message = match Message::decode(&inbound.data) {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::trace!(origin = %inbound.origin, "Ignoring foreign message");
                return;
            }
            Err(e) => {
                tracing::warn!(origin = %inbound.origin, error = %e, "Malformed message");
                if let Route::Sandbox { service } = &route
                    && self.is_running(service)
                {
                    self.abort_chain(&SupervisorError::Message(e));
                }
                return;
            }
        };

        let handled = match route {
            Route::Application => self.on_application_message(&inbound.origin, message),
            Route::Sandbox { service } => self.on_sandbox_message(&service, &inbound, message),
            Route::Ignore => Ok(()),
        };
        if let Err(e) = handled {
            tracing::error!(origin = %inbound.origin, error = %e, "Message rejected");
        }
    }

    fn on_application_message(
        &mut self,
        origin: &str,
        message: Message,
    ) -> Result<(), SupervisorError> {
        match message {
            Message::FunctionCallRequest(request) => self.call(origin, request),
            Message::PreloadPluginsRequest(request) => self.preload_plugins(origin, request),
            other => {
                tracing::debug!(origin, tag = other.tag(), "Unexpected message from application");
                Ok(())
            }
        }
    }

    fn on_sandbox_message(
        &mut self,
        service: &str,
        inbound: &Inbound,
        message: Message,
    ) -> Result<(), SupervisorError> {
        match message {
            Message::LoaderInitialized => {
                if let Some(context) = self.services.get(service) {
                    context.mark_initialized(&inbound.origin);
                }
                Ok(())
            }
            Message::PreloadComplete(complete) => {
                let plugin = self
                    .services
                    .get(service)
                    .and_then(|context| context.plugin(&complete.plugin))
                    .cloned();
                match plugin {
                    Some(plugin) => {
                        plugin.on_message(inbound, Message::PreloadComplete(complete), self)
                    }
                    None => {
                        tracing::warn!(
                            service,
                            plugin = %complete.plugin,
                            "Preload completed for unknown plugin"
                        );
                        Ok(())
                    }
                }
            }
            message @ (Message::PluginCallResponse(_) | Message::PluginSyncCall(_)) => {
                match self.running_plugin(service) {
                    Some(plugin) => plugin.on_message(inbound, message, self),
                    None => {
                        let error = SupervisorError::OriginViolation {
                            expected: self
                                .context
                                .expected_origin()
                                .unwrap_or_else(|| "<no active call>".into()),
                            actual: inbound.origin.clone(),
                        };
                        if self.context.is_active() {
                            self.abort_chain(&error);
                        }
                        Err(error)
                    }
                }
            }
            other => {
                tracing::debug!(service, tag = other.tag(), "Unexpected message from sandbox");
                Ok(())
            }
        }
    }

    fn is_running(&self, service: &str) -> bool {
        self.context
            .top()
            .is_some_and(|call| call.args.service == service)
    }

    /// The plugin on top of the stack, if it belongs to `service`.
    fn running_plugin(&self, service: &str) -> Option<Plugin> {
        let call = self.context.top().filter(|call| call.args.service == service)?;
        self.services
            .get(service)?
            .plugin(&call.args.plugin)
            .cloned()
    }

    pub fn on_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::DispatchFailed { generation, error } => {
                if generation != self.context.generation() || !self.context.is_active() {
                    tracing::debug!(generation, error = %error, "Ignoring stale dispatch failure");
                    return;
                }
                self.abort_chain(&error);
            }
            SupervisorEvent::CallDeadline {
                generation,
                depth,
                started,
            } => {
                let expired = generation == self.context.generation()
                    && self.context.depth() == depth
                    && self.context.top().is_some_and(|call| call.start_time == started);
                if !expired {
                    return;
                }
                let call = self
                    .context
                    .top()
                    .map(|call| call.args.to_string())
                    .unwrap_or_default();
                let error = SupervisorError::CallTimeout {
                    call,
                    timeout_ms: self.config.call_timeout_ms.unwrap_or_default(),
                };
                self.abort_chain(&error);
            }
        }
    }

    fn load_plugin(&mut self, id: &QualifiedPluginId) -> Result<Plugin, SupervisorError> {
        if self.config.is_host_service(&id.service) {
            return Err(SupervisorError::HostService(id.service.clone()));
        }
        let context = match self.services.entry(id.service.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_abandoned() {
                    tracing::warn!(service = %id.service, "Sandbox never initialized, reopening");
                    entry.insert(ServiceContext::new(
                        &id.service,
                        self.locator.as_ref(),
                        self.transport.clone(),
                        self.config.timeouts(),
                    )?);
                }
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(ServiceContext::new(
                &id.service,
                self.locator.as_ref(),
                self.transport.clone(),
                self.config.timeouts(),
            )?),
        };
        Ok(context.load_plugin(&id.plugin))
    }

    fn spawn_preload(&self, plugin: Plugin) {
        if plugin.state() != PluginState::Uninitialized {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = plugin.ready().await {
                tracing::warn!(plugin = %plugin.id(), error = %e, "Preload failed");
            }
        });
    }

    /// Dispatch the frame on top of the stack to its plugin.
    fn process_top(&mut self) -> Result<(), SupervisorError> {
        let Some(top) = self.context.top() else {
            return Ok(());
        };
        let caller = top.caller.clone();
        let args = top.args.clone();
        let started = top.start_time;

        let plugin = self.load_plugin(&args.plugin_id())?;
        let memory = self.context.attach_cache();

        let ticket = self.context.ticket();
        let generation = ticket.generation();
        let depth = self.context.depth();
        self.metrics.record_frame_dispatched();
        tracing::debug!(call = %args, depth, "Dispatching call");

        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let QualifiedFunctionCallArgs {
                intf,
                method,
                params,
                ..
            } = args;
            let dispatched = plugin
                .call(&caller, intf.as_deref(), &method, params, memory, &ticket)
                .await;
            if let Err(error) = dispatched {
                let _ = events.send(SupervisorEvent::DispatchFailed { generation, error });
            }
        });

        if let Some(limit) = self.config.call_timeout() {
            let events = self.events_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let _ = events.send(SupervisorEvent::CallDeadline {
                    generation,
                    depth,
                    started,
                });
            });
        }
        Ok(())
    }

    /// Fail the active chain: reply an error to the root application and reset.
    fn abort_chain(&mut self, error: &SupervisorError) {
        tracing::error!(error = %error, depth = self.context.depth(), "Aborting call chain");
        let root = self.context.root_app().cloned();
        if root.is_some() || self.context.is_active() {
            self.metrics.record_chain_aborted();
        }
        self.context.reset();
        if let Some(root) = root {
            post_reply(
                self.transport.as_ref(),
                &root,
                ErrorResult::unrecoverable(error.to_string()).to_value(),
            );
        }
    }

    /// Abort the chain if `result` is an error, then return it.
    fn guard(&mut self, result: Result<(), SupervisorError>) -> Result<(), SupervisorError> {
        if let Err(e) = &result {
            self.abort_chain(e);
        }
        result
    }

    fn start_chain(
        &mut self,
        origin: &str,
        request: FunctionCallRequest,
    ) -> Result<(), SupervisorError> {
        self.context
            .bind_root(origin, &request.id, FunctionCallArgs::from(&request.args))?;
        request.args.validate(sandcall_messaging::tags::FUNCTION_CALL_REQUEST)?;
        self.context.push_call(origin, request.args)?;
        self.process_top()
    }

    fn complete_chain(
        &mut self,
        root: Option<RootApp>,
        result: Value,
        actions: Vec<AddableAction>,
    ) {
        let Some(root) = root else {
            tracing::warn!("Call chain completed without a root application");
            return;
        };
        self.metrics.record_chain_completed();

        if actions.is_empty() {
            tracing::info!(id = %root.request_id, "Call chain completed");
            post_reply(self.transport.as_ref(), &root, result);
            return;
        }

        tracing::info!(
            id = %root.request_id,
            actions = actions.len(),
            "Call chain completed, submitting transaction"
        );
        let submitter = self.submitter.clone();
        let transport = self.transport.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let reply = match submitter.submit(&actions).await {
                Ok(receipt) => {
                    metrics.record_transaction_submitted();
                    tracing::info!(
                        id = %root.request_id,
                        transaction_id = %receipt.transaction_id,
                        "Transaction submitted"
                    );
                    result
                }
                Err(e) => {
                    metrics.record_transaction_failed();
                    tracing::error!(
                        id = %root.request_id,
                        error = %e,
                        "Transaction submission failed"
                    );
                    ErrorResult::unrecoverable(format!("transaction submission failed: {e}"))
                        .to_value()
                }
            };
            post_reply(transport.as_ref(), &root, reply);
        });
    }

    fn try_sync_call(
        &mut self,
        origin: &str,
        args: QualifiedFunctionCallArgs,
    ) -> Result<(), SupervisorError> {
        self.context.assert_plugin_calls_allowed()?;
        args.validate(sandcall_messaging::tags::PLUGIN_SYNC_CALL)?;
        tracing::debug!(origin, call = %args, "Nested call");
        self.context.push_call(origin, args)?;
        self.process_top()
    }

    fn try_set_result(
        &mut self,
        origin: &str,
        call: &FunctionCallArgs,
        result: Value,
    ) -> Result<(), SupervisorError> {
        self.context.assert_plugin_calls_allowed()?;
        match self.context.pop_call(origin, call, result)? {
            PopOutcome::Continue => {
                self.metrics.record_result_cached();
                self.process_top()
            }
            PopOutcome::Completed {
                root,
                result,
                actions,
            } => {
                self.complete_chain(root, result, actions);
                Ok(())
            }
            PopOutcome::Aborted { root, error } => {
                self.metrics.record_chain_aborted();
                if let Some(root) = root {
                    post_reply(self.transport.as_ref(), &root, error.to_value());
                }
                Ok(())
            }
        }
    }

    fn try_register_dependencies(
        &mut self,
        origin: &str,
        plugin: &QualifiedPluginId,
        dependencies: Vec<QualifiedPluginId>,
    ) -> Result<(), SupervisorError> {
        let expected = self.locator.origin(&plugin.service);
        if origin != expected {
            return Err(SupervisorError::OriginViolation {
                expected,
                actual: origin.to_string(),
            });
        }
        tracing::info!(
            plugin = %plugin,
            dependencies = dependencies.len(),
            "Dependencies registered"
        );
        for dependency in dependencies {
            if self.config.is_host_service(&dependency.service) {
                continue;
            }
            match self.load_plugin(&dependency) {
                Ok(handle) => self.spawn_preload(handle),
                Err(e) => {
                    tracing::warn!(plugin = %dependency, error = %e, "Dependency preload failed");
                }
            }
        }
        Ok(())
    }
}

fn post_reply(transport: &dyn Transport, root: &RootApp, result: Value) {
    let target = Target::Parent {
        origin: root.origin.clone(),
    };
    let reply =
        Message::function_call_response(root.request_id.clone(), root.call.clone(), result);
    if let Err(e) = transport.post(&target, &reply) {
        tracing::error!(
            origin = %root.origin,
            id = %root.request_id,
            error = %e,
            "Failed to deliver reply"
        );
    }
}

impl AppInterface for Supervisor {
    fn call(&mut self, origin: &str, request: FunctionCallRequest) -> Result<(), SupervisorError> {
        if let Some(root) = self.context.root_app()
            && root.origin != origin
        {
            return Err(SupervisorError::RootOriginMismatch {
                bound: root.origin.clone(),
                caller: origin.to_string(),
            });
        }
        if self.context.is_active() {
            return Err(SupervisorError::ResolutionInProgress {
                origin: origin.to_string(),
            });
        }

        tracing::info!(origin, id = %request.id, call = %request.args, "Root call received");
        self.metrics.record_chain_started();
        let result = self.start_chain(origin, request);
        self.guard(result)
    }

    fn preload_plugins(
        &mut self,
        origin: &str,
        request: PreLoadPluginsRequest,
    ) -> Result<(), SupervisorError> {
        tracing::info!(origin, services = ?request.services, "Preloading plugins");
        for service in request.services {
            if self.config.is_host_service(&service) {
                continue;
            }
            let plugin = self.load_plugin(&QualifiedPluginId::new(service, DEFAULT_PLUGIN))?;
            self.spawn_preload(plugin);
        }
        Ok(())
    }
}

impl HostInterface for Supervisor {
    fn register_dependencies(
        &mut self,
        origin: &str,
        plugin: &QualifiedPluginId,
        dependencies: Vec<QualifiedPluginId>,
    ) -> Result<(), SupervisorError> {
        // Preloading never touches the call chain.
        self.try_register_dependencies(origin, plugin, dependencies)
    }

    fn sync_call(
        &mut self,
        origin: &str,
        args: QualifiedFunctionCallArgs,
    ) -> Result<(), SupervisorError> {
        let result = self.try_sync_call(origin, args);
        self.guard(result)
    }

    fn set_result(
        &mut self,
        origin: &str,
        call: &FunctionCallArgs,
        result: Value,
    ) -> Result<(), SupervisorError> {
        let result = self.try_set_result(origin, call, result);
        self.guard(result)
    }

    fn add_actions(
        &mut self,
        origin: &str,
        actions: Vec<AddableAction>,
    ) -> Result<(), SupervisorError> {
        let result = self
            .context
            .assert_plugin_calls_allowed()
            .and_then(|()| self.context.add_actions(origin, actions));
        self.guard(result)
    }
}
