use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sandcall_messaging::{
    AddableAction, FunctionCallRequest, FunctionCallResponse, Message, QualifiedFunctionCallArgs,
};
use sandcall_supervisor::{
    MetricsSnapshot, PluginScript, RecordingSubmitter, SiblingDomain, Simulation, Supervisor,
    SupervisorConfig,
};
use serde::{Deserialize, Serialize};

/// A scripted call chain: supervisor settings, the root call, and the
/// plugins the simulated sandboxes run.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Origin of the root application. Defaults to the bare root domain.
    pub origin: Option<String>,
    /// Services to preload before the call.
    #[serde(default)]
    pub preload: Vec<String>,
    /// Services whose sandboxes never initialize.
    #[serde(default)]
    pub unresponsive: Vec<String>,
    pub call: QualifiedFunctionCallArgs,
    #[serde(default)]
    pub plugins: Vec<PluginScript>,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub reply: FunctionCallResponse,
    pub transactions: Vec<Vec<AddableAction>>,
    pub invocations: usize,
    pub metrics: MetricsSnapshot,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content).context("failed to parse scenario")?;
        scenario.supervisor.validate()?;
        scenario.call.validate("scenario call")?;
        Ok(scenario)
    }

    fn root_origin(&self) -> String {
        self.origin.clone().unwrap_or_else(|| {
            format!("{}://{}", self.supervisor.scheme, self.supervisor.root_domain)
        })
    }

    /// Run the scenario against a fresh supervisor and wait up to `wait`
    /// for the reply.
    pub async fn run(self, wait: Duration) -> Result<SimulationReport> {
        let origin = self.root_origin();
        let (sim, mut channels) =
            Simulation::new(SiblingDomain::from_config(&self.supervisor), self.plugins);
        let sim = Arc::new(
            self.unresponsive
                .into_iter()
                .fold(sim, |sim, service| sim.with_unresponsive(service)),
        );
        let submitter = Arc::new(RecordingSubmitter::new());

        let supervisor = Supervisor::new(self.supervisor, sim.clone(), submitter.clone());
        let metrics = supervisor.metrics();
        let event_loop = tokio::spawn(supervisor.run(channels.inbound));

        if !self.preload.is_empty() {
            sim.send_from_application(&origin, &Message::preload_plugins_request(self.preload))?;
        }
        let request = FunctionCallRequest::new(self.call);
        tracing::info!(
            origin = %origin,
            id = %request.id,
            call = %request.args,
            "Running scenario"
        );
        sim.send_from_application(&origin, &Message::FunctionCallRequest(request))?;

        let reply = tokio::time::timeout(wait, channels.replies.recv())
            .await
            .with_context(|| format!("no reply within {}ms", wait.as_millis()))?
            .context("supervisor stopped before replying")?;
        event_loop.abort();

        Ok(SimulationReport {
            reply,
            transactions: submitter.batches(),
            invocations: sim.invocations().len(),
            metrics: metrics.snapshot(),
        })
    }
}
