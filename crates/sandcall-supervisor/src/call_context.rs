use std::sync::Arc;

use sandcall_messaging::{
    AddableAction, ErrorResult, FunctionCallArgs, QualifiedFunctionCallArgs, ResultCache,
};
use serde_json::Value;
use tokio::sync::watch;

use crate::call_stack::{Call, CallStack};
use crate::error::SupervisorError;
use crate::locator::ServiceLocator;

/// The application that owns the chain currently resolving.
#[derive(Debug, Clone, PartialEq)]
pub struct RootApp {
    pub origin: String,
    /// Id of the request that started the chain, echoed in the reply.
    pub request_id: String,
    /// The root call, echoed in the reply.
    pub call: FunctionCallArgs,
}

/// What the supervisor has to do after a result is popped.
#[derive(Debug)]
pub enum PopOutcome {
    /// The caller is still on the stack; the result is cached for it and
    /// the caller must be re-dispatched.
    Continue,
    /// The root call resolved. The context has been reset.
    Completed {
        root: Option<RootApp>,
        result: Value,
        actions: Vec<AddableAction>,
    },
    /// The chain failed. The context has been reset and nothing is submitted.
    Aborted {
        root: Option<RootApp>,
        error: ErrorResult,
    },
}

/// Ties spawned work to the chain that started it.
///
/// The ticket is stale once the context resets.
#[derive(Debug, Clone)]
pub struct ChainTicket {
    generation: u64,
    current: watch::Receiver<u64>,
}

impl ChainTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        *self.current.borrow() == self.generation
    }

    /// Run `f` only while the chain is still current. The context cannot
    /// reset while `f` runs.
    pub fn while_current<T>(&self, f: impl FnOnce() -> T) -> Option<T> {
        let current = self.current.borrow();
        (*current == self.generation).then(f)
    }
}

/// State of the one call chain the supervisor resolves at a time.
pub struct CallContext {
    locator: Arc<dyn ServiceLocator>,
    stack: CallStack,
    cache: Vec<ResultCache>,
    actions: Vec<AddableAction>,
    root: Option<RootApp>,
    generation: watch::Sender<u64>,
}

impl CallContext {
    pub fn new(locator: Arc<dyn ServiceLocator>) -> Self {
        Self {
            locator,
            stack: CallStack::new(),
            cache: Vec::new(),
            actions: Vec::new(),
            root: None,
            generation: watch::channel(0).0,
        }
    }

    pub fn root_app(&self) -> Option<&RootApp> {
        self.root.as_ref()
    }

    /// Bind the chain to the application that started it. A context bound to
    /// one origin rejects every other origin until it resets.
    pub fn bind_root(
        &mut self,
        origin: &str,
        request_id: &str,
        call: FunctionCallArgs,
    ) -> Result<(), SupervisorError> {
        if let Some(bound) = &self.root
            && bound.origin != origin
        {
            return Err(SupervisorError::RootOriginMismatch {
                bound: bound.origin.clone(),
                caller: origin.to_string(),
            });
        }
        self.root = Some(RootApp {
            origin: origin.to_string(),
            request_id: request_id.to_string(),
            call,
        });
        Ok(())
    }

    /// Incremented on every reset. Identifies the chain a late event belongs to.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// A ticket for work spawned on behalf of the current chain.
    pub fn ticket(&self) -> ChainTicket {
        ChainTicket {
            generation: self.generation(),
            current: self.generation.subscribe(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn top(&self) -> Option<&Call> {
        self.stack.peek(0)
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn cache(&self) -> &[ResultCache] {
        &self.cache
    }

    pub fn actions(&self) -> &[AddableAction] {
        &self.actions
    }

    /// Origin allowed to act on the chain right now: the sandbox of the
    /// service on top of the stack.
    pub fn expected_origin(&self) -> Option<String> {
        self.top().map(|call| self.locator.origin(&call.args.service))
    }

    fn check_origin(&self, origin: &str) -> Result<(), SupervisorError> {
        match self.expected_origin() {
            Some(expected) if expected != origin => Err(SupervisorError::OriginViolation {
                expected,
                actual: origin.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub fn assert_plugin_calls_allowed(&self) -> Result<(), SupervisorError> {
        if self.is_active() && self.root.is_some() {
            Ok(())
        } else {
            Err(SupervisorError::NoActiveChain)
        }
    }

    /// Push a call made by `origin`. On a non-empty stack only the sandbox of
    /// the service on top may push.
    pub fn push_call(
        &mut self,
        origin: &str,
        args: QualifiedFunctionCallArgs,
    ) -> Result<(), SupervisorError> {
        self.check_origin(origin)?;
        self.stack.push(Call::new(origin, args));
        Ok(())
    }

    /// Deliver the result of the call on top of the stack.
    pub fn pop_call(
        &mut self,
        origin: &str,
        call: &FunctionCallArgs,
        result: Value,
    ) -> Result<PopOutcome, SupervisorError> {
        let top = self.stack.peek(0).ok_or(SupervisorError::StackUnderflow)?;
        self.check_origin(origin)?;
        if !call.matches(&top.args) {
            return Err(SupervisorError::ReplyMismatch {
                expected: top.args.to_string(),
                actual: format!("{}->{}", call.service, call.method),
            });
        }
        let popped = self.stack.pop().ok_or(SupervisorError::StackUnderflow)?;

        if let Some(error) = ErrorResult::from_value(&result)
            && (!error.is_recoverable() || self.stack.is_empty())
        {
            tracing::warn!(
                call = %popped.args,
                error_type = %error.error_type,
                reason = error.message().unwrap_or_default(),
                "Call chain failed"
            );
            let root = self.root.clone();
            self.reset();
            return Ok(PopOutcome::Aborted { root, error });
        }

        let Some(caller) = self.stack.peek(0) else {
            let root = self.root.clone();
            let actions = std::mem::take(&mut self.actions);
            self.reset();
            return Ok(PopOutcome::Completed {
                root,
                result,
                actions,
            });
        };

        let entry = ResultCache::new(caller.args.service.clone(), &popped.args, result);
        self.remember(entry);
        Ok(PopOutcome::Continue)
    }

    fn remember(&mut self, entry: ResultCache) {
        let identity = entry.identity();
        tracing::debug!(
            audience = %entry.allowed_service,
            call = %format!("{}:{}->{}", entry.call_service, entry.call_plugin, entry.call_method),
            "Result cached"
        );
        match self.cache.iter_mut().find(|e| e.identity() == identity) {
            Some(existing) => *existing = entry,
            None => self.cache.push(entry),
        }
    }

    /// Cache entries visible to `service`. Every plugin of a service sees
    /// the same entries, so `plugin` only labels the lookup.
    pub fn cached_results(&self, service: &str, plugin: &str) -> Vec<ResultCache> {
        let visible: Vec<ResultCache> = self
            .cache
            .iter()
            .filter(|entry| entry.allowed_service == service)
            .cloned()
            .collect();
        tracing::trace!(service, plugin, entries = visible.len(), "Cache lookup");
        visible
    }

    /// Snapshot the cache entries visible to the top frame and record them on
    /// the frame.
    pub fn attach_cache(&mut self) -> Vec<ResultCache> {
        let Some((service, plugin)) = self
            .top()
            .map(|call| (call.args.service.clone(), call.args.plugin.clone()))
        else {
            return Vec::new();
        };
        let visible = self.cached_results(&service, &plugin);
        if let Some(top) = self.stack.peek_mut(0) {
            top.result_cache = Some(visible.clone());
        }
        visible
    }

    /// Append actions emitted by `origin` to the pending transaction.
    pub fn add_actions(
        &mut self,
        origin: &str,
        actions: Vec<AddableAction>,
    ) -> Result<(), SupervisorError> {
        self.check_origin(origin)?;
        if !actions.is_empty() {
            tracing::debug!(origin, count = actions.len(), "Actions added");
        }
        self.actions.extend(actions);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.stack.reset();
        self.cache.clear();
        self.actions.clear();
        self.root = None;
        self.generation.send_modify(|generation| *generation += 1);
    }
}
