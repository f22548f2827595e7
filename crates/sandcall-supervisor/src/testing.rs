//! Recording doubles for unit tests.

use std::sync::Mutex;

use sandcall_messaging::{
    AddableAction, FunctionCallArgs, Message, QualifiedFunctionCallArgs, QualifiedPluginId,
};
use serde_json::Value;

use crate::error::SupervisorError;
use crate::host::HostInterface;
use crate::transport::{Target, Transport, TransportError};

#[derive(Default)]
pub struct RecordingTransport {
    opened: Mutex<Vec<(String, String)>>,
    posted: Mutex<Vec<(Target, Message)>>,
    refuse: bool,
    refused_services: Vec<String>,
}

impl RecordingTransport {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// Refuses to open sandboxes for `service` only.
    pub fn refusing_service(service: &str) -> Self {
        Self {
            refused_services: vec![service.to_string()],
            ..Self::default()
        }
    }

    pub fn opened(&self) -> Vec<(String, String)> {
        self.opened.lock().unwrap().clone()
    }

    pub fn posted(&self) -> Vec<(Target, Message)> {
        self.posted.lock().unwrap().clone()
    }

    pub async fn wait_for_posts(&self, count: usize) {
        while self.posted.lock().unwrap().len() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl Transport for RecordingTransport {
    fn open_sandbox(&self, service: &str, url: &str) -> Result<(), TransportError> {
        if self.refuse || self.refused_services.iter().any(|s| s == service) {
            return Err(TransportError::SandboxUnavailable {
                service: service.into(),
                reason: "refused".into(),
            });
        }
        self.opened
            .lock()
            .unwrap()
            .push((service.to_string(), url.to_string()));
        Ok(())
    }

    fn post(&self, target: &Target, message: &Message) -> Result<(), TransportError> {
        if self.refuse {
            return Err(TransportError::Unreachable(target.origin().into()));
        }
        self.posted
            .lock()
            .unwrap()
            .push((target.clone(), message.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    RegisterDependencies {
        plugin: QualifiedPluginId,
        dependencies: Vec<QualifiedPluginId>,
    },
    SyncCall {
        origin: String,
        args: QualifiedFunctionCallArgs,
    },
    SetResult {
        origin: String,
        call: FunctionCallArgs,
        result: Value,
    },
    AddActions {
        origin: String,
        actions: Vec<AddableAction>,
    },
}

#[derive(Default)]
pub struct RecordingHost {
    pub calls: Vec<HostCall>,
}

impl HostInterface for RecordingHost {
    fn register_dependencies(
        &mut self,
        _origin: &str,
        plugin: &QualifiedPluginId,
        dependencies: Vec<QualifiedPluginId>,
    ) -> Result<(), SupervisorError> {
        self.calls.push(HostCall::RegisterDependencies {
            plugin: plugin.clone(),
            dependencies,
        });
        Ok(())
    }

    fn sync_call(
        &mut self,
        origin: &str,
        args: QualifiedFunctionCallArgs,
    ) -> Result<(), SupervisorError> {
        self.calls.push(HostCall::SyncCall {
            origin: origin.into(),
            args,
        });
        Ok(())
    }

    fn set_result(
        &mut self,
        origin: &str,
        call: &FunctionCallArgs,
        result: Value,
    ) -> Result<(), SupervisorError> {
        self.calls.push(HostCall::SetResult {
            origin: origin.into(),
            call: call.clone(),
            result,
        });
        Ok(())
    }

    fn add_actions(
        &mut self,
        origin: &str,
        actions: Vec<AddableAction>,
    ) -> Result<(), SupervisorError> {
        self.calls.push(HostCall::AddActions {
            origin: origin.into(),
            actions,
        });
        Ok(())
    }
}
