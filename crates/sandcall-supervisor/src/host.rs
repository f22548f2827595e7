use sandcall_messaging::{
    AddableAction, FunctionCallArgs, FunctionCallRequest, PreLoadPluginsRequest,
    QualifiedFunctionCallArgs, QualifiedPluginId,
};
use serde_json::Value;

use crate::error::SupervisorError;

/// Operations plugins invoke on the supervisor. `origin` is always the
/// origin the message arrived from, never a value the plugin chose.
pub trait HostInterface {
    /// The plugin finished preloading and depends on `dependencies`.
    fn register_dependencies(
        &mut self,
        origin: &str,
        plugin: &QualifiedPluginId,
        dependencies: Vec<QualifiedPluginId>,
    ) -> Result<(), SupervisorError>;

    /// The running plugin needs the result of another plugin function.
    fn sync_call(
        &mut self,
        origin: &str,
        args: QualifiedFunctionCallArgs,
    ) -> Result<(), SupervisorError>;

    /// The running plugin produced the result of `call`.
    fn set_result(
        &mut self,
        origin: &str,
        call: &FunctionCallArgs,
        result: Value,
    ) -> Result<(), SupervisorError>;

    fn add_actions(
        &mut self,
        origin: &str,
        actions: Vec<AddableAction>,
    ) -> Result<(), SupervisorError>;
}

/// Operations the root application invokes on the supervisor.
pub trait AppInterface {
    /// Start resolving a root call. The reply is posted to `origin` later.
    fn call(&mut self, origin: &str, request: FunctionCallRequest) -> Result<(), SupervisorError>;

    fn preload_plugins(
        &mut self,
        origin: &str,
        request: PreLoadPluginsRequest,
    ) -> Result<(), SupervisorError>;
}
