//! Sidecar lifecycle
//!
//! The supervisor runs in two phases, each raced against the shutdown
//! signal:
//!
//! 1. **Establish**: idempotency guard, task metadata, activation,
//!    registration. Any failure here ends the sidecar with an error and
//!    performs no cleanup.
//! 2. **Supervise**: launch the agent and wait for it.
//!
//! A shutdown request in either phase runs the teardown with whatever was
//! established so far. An activation or registration already in flight is
//! allowed to finish first, as the agent may persist its registration at
//! any point while it runs. Teardown never fails: the activation deletion and
//! the deregistration are logged and skipped on error, and the agent is
//! always signalled when it was launched.

use std::future::Future;
use std::pin::Pin;
use std::process::ExitCode;

use ecs_fis_core::config::SidecarSettings;

use crate::agent::{AgentExit, AgentProcess, AgentRuntime};
use crate::env::SidecarEnv;
use crate::error::{Result, SidecarError};
use crate::metadata::{MetadataClient, TaskMetadata};
use crate::ssm::{activation_tags, read_managed_instance_id, Activation, ManagedInstanceApi};

/// What the teardown managed to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// The activation was deleted
    pub activation_deleted: bool,
    /// The managed instance was deregistered
    pub instance_deregistered: bool,
    /// The agent was sent SIGTERM
    pub agent_signalled: bool,
}

/// How a supervised run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The agent exited on its own
    AgentExited(AgentExit),
    /// A shutdown request triggered the teardown
    TornDown(TeardownReport),
}

impl Outcome {
    /// Exit status for this outcome: the agent's own code, or 0 after teardown
    pub fn status(&self) -> u8 {
        match self {
            Self::AgentExited(AgentExit { code: Some(code) }) => u8::try_from(*code).unwrap_or(1),
            Self::AgentExited(AgentExit { code: None }) => 1,
            Self::TornDown(_) => 0,
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.status())
    }
}

/// Whether a shutdown request arrived during a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Completed,
    Interrupted,
}

impl Step {
    fn is_interrupted(self) -> bool {
        self == Self::Interrupted
    }
}

/// Drive `step` to completion even when `shutdown` resolves first
async fn finish_step<F, S>(step: F, shutdown: &mut Pin<&mut S>) -> (F::Output, Step)
where
    F: Future,
    S: Future<Output = ()>,
{
    tokio::pin!(step);
    tokio::select! {
        output = &mut step => (output, Step::Completed),
        () = shutdown.as_mut() => {
            tracing::info!("Shutdown requested, finishing the step in progress first");
            (step.await, Step::Interrupted)
        }
    }
}

/// State built up during the establish phase
#[derive(Debug, Default)]
struct Progress {
    region: Option<String>,
    activation: Option<Activation>,
}

/// Registers, runs and cleans up the SSM agent
#[derive(Debug)]
pub struct Supervisor<M, R> {
    settings: SidecarSettings,
    env: SidecarEnv,
    api: M,
    runtime: R,
    http: reqwest::Client,
}

impl<M, R> Supervisor<M, R>
where
    M: ManagedInstanceApi,
    R: AgentRuntime,
{
    /// Create a supervisor
    pub fn new(settings: SidecarSettings, env: SidecarEnv, api: M, runtime: R) -> Self {
        Self {
            settings,
            env,
            api,
            runtime,
            http: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured HTTP client for the metadata endpoint
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Run until the agent exits or `shutdown` resolves
    pub async fn run<S>(&self, shutdown: S) -> Result<Outcome>
    where
        S: Future<Output = ()>,
    {
        self.settings.validate()?;
        tokio::pin!(shutdown);
        let mut progress = Progress::default();

        if self.establish(&mut progress, &mut shutdown).await?.is_interrupted() {
            return Ok(Outcome::TornDown(self.teardown(&progress, None).await));
        }

        let mut agent = self.runtime.launch().await?;
        let exited = tokio::select! {
            exit = agent.wait() => Some(exit),
            () = &mut shutdown => None,
        };
        match exited {
            Some(exit) => {
                let exit = exit?;
                tracing::info!("SSM agent exited with code {:?}", exit.code);
                Ok(Outcome::AgentExited(exit))
            }
            None => Ok(Outcome::TornDown(
                self.teardown(&progress, Some(agent.as_mut())).await,
            )),
        }
    }

    /// Register the agent, stopping early when `shutdown` resolves
    ///
    /// The guard and the metadata lookup have no side effects and are simply
    /// dropped on shutdown. Activation and registration always run to
    /// completion, so teardown sees everything they created.
    async fn establish<S>(
        &self,
        progress: &mut Progress,
        shutdown: &mut Pin<&mut S>,
    ) -> Result<Step>
    where
        S: Future<Output = ()>,
    {
        let prepared = tokio::select! {
            result = self.prepare() => Some(result),
            () = shutdown.as_mut() => None,
        };
        let Some(prepared) = prepared else {
            tracing::info!("Shutdown requested before the agent was registered");
            return Ok(Step::Interrupted);
        };
        let (metadata, region) = prepared?;
        progress.region = Some(region.clone());

        let tags = activation_tags(&metadata, &self.settings.marker_tag);
        let (created, step) = finish_step(
            self.api.create_activation(&self.env.role_name, &tags, &region),
            shutdown,
        )
        .await;
        let activation = match created {
            Ok(activation) => {
                tracing::info!("Created SSM activation {}", activation.activation_id);
                progress.activation = Some(activation.clone());
                activation
            }
            Err(e) if step.is_interrupted() => {
                tracing::warn!("SSM activation failed during shutdown: {}", e);
                return Ok(Step::Interrupted);
            }
            Err(e) => return Err(e),
        };
        if step.is_interrupted() {
            return Ok(Step::Interrupted);
        }

        let (registered, step) =
            finish_step(self.runtime.register(&activation, &region), shutdown).await;
        match registered {
            Err(e) if step.is_interrupted() => {
                tracing::warn!("Registration failed during shutdown: {}", e);
                Ok(step)
            }
            Err(e) => Err(e),
            Ok(()) => Ok(step),
        }
    }

    /// Idempotency guard, metadata and region
    async fn prepare(&self) -> Result<(TaskMetadata, String)> {
        if self.runtime.is_running()? {
            return Err(SidecarError::AlreadyRunning);
        }

        let uri = self
            .env
            .metadata_uri
            .as_deref()
            .ok_or(SidecarError::MetadataUnavailable)?;
        tracing::info!("Found ECS Container Metadata, running activation with metadata");

        let metadata = MetadataClient::new(self.http.clone(), uri).fetch_task().await?;
        let region = metadata.region()?;
        tracing::info!(
            "Found ECS Task ARN: {}, Availability Zone: {}, Region: {}",
            metadata.task_arn,
            metadata.availability_zone,
            region
        );
        Ok((metadata, region))
    }

    async fn teardown(
        &self,
        progress: &Progress,
        agent: Option<&mut (dyn AgentProcess + 'static)>,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();
        let region = progress.region.as_deref();

        match (&progress.activation, region) {
            (Some(activation), Some(region)) => {
                tracing::info!("Deleting SSM activation {}", activation.activation_id);
                match self.api.delete_activation(&activation.activation_id, region).await {
                    Ok(()) => report.activation_deleted = true,
                    Err(e) => tracing::error!(
                        "SSM activation {} failed to be deleted: {}",
                        activation.activation_id,
                        e
                    ),
                }
            }
            _ => tracing::warn!("No SSM activation to delete"),
        }

        match (read_managed_instance_id(&self.settings.registration_file), region) {
            (Ok(instance_id), Some(region)) => {
                tracing::info!("Deregistering SSM Managed Instance {}", instance_id);
                match self.api.deregister_managed_instance(&instance_id, region).await {
                    Ok(()) => report.instance_deregistered = true,
                    Err(e) => tracing::error!(
                        "SSM Managed Instance {} failed to be deregistered: {}",
                        instance_id,
                        e
                    ),
                }
            }
            (Ok(instance_id), None) => {
                tracing::warn!("Region unknown, cannot deregister {}", instance_id)
            }
            (Err(e), _) => tracing::warn!("{}", e),
        }

        if let Some(agent) = agent {
            match agent.terminate() {
                Ok(()) => {
                    report.agent_signalled = true;
                    match agent.wait().await {
                        Ok(exit) => tracing::info!("SSM agent stopped with code {:?}", exit.code),
                        Err(e) => tracing::warn!("Waiting for SSM agent failed: {}", e),
                    }
                }
                Err(e) => tracing::error!("Failed to stop SSM agent: {}", e),
            }
        }

        report
    }
}
