use chrono::{DateTime, Utc};
use sandcall_messaging::{QualifiedFunctionCallArgs, ResultCache};

/// One outstanding plugin function call.
#[derive(Debug, Clone)]
pub struct Call {
    /// Origin that issued the call.
    pub caller: String,
    pub args: QualifiedFunctionCallArgs,
    pub start_time: DateTime<Utc>,
    /// Cache snapshot the frame was last dispatched with.
    pub result_cache: Option<Vec<ResultCache>>,
}

impl Call {
    pub fn new(caller: impl Into<String>, args: QualifiedFunctionCallArgs) -> Self {
        Self {
            caller: caller.into(),
            args,
            start_time: Utc::now(),
            result_cache: None,
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.start_time).num_milliseconds()
    }
}

/// LIFO stack of outstanding calls. The bottom frame is the root call made
/// by the application; the top frame is the one currently executing.
#[derive(Debug, Default)]
pub struct CallStack {
    calls: Vec<Call>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: Call) {
        tracing::debug!(
            call = %call.args,
            caller = %call.caller,
            depth = self.calls.len() + 1,
            "Call pushed"
        );
        self.calls.push(call);
    }

    pub fn pop(&mut self) -> Option<Call> {
        let call = self.calls.pop()?;
        tracing::debug!(
            call = %call.args,
            elapsed_ms = call.elapsed_ms(),
            depth = self.calls.len(),
            "Call popped"
        );
        Some(call)
    }

    /// The frame `depth` places below the top; `peek(0)` is the top.
    pub fn peek(&self, depth: usize) -> Option<&Call> {
        let index = self.calls.len().checked_sub(depth)?.checked_sub(1)?;
        self.calls.get(index)
    }

    pub fn peek_mut(&mut self, depth: usize) -> Option<&mut Call> {
        let index = self.calls.len().checked_sub(depth)?.checked_sub(1)?;
        self.calls.get_mut(index)
    }

    /// The frame `height` places above the bottom; `peek_bottom(0)` is the root call.
    pub fn peek_bottom(&self, height: usize) -> Option<&Call> {
        self.calls.get(height)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn reset(&mut self) {
        self.calls.clear();
    }
}
