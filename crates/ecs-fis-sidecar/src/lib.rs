//! ECS FIS Sidecar - Native supervisor for the SSM agent sidecar
//!
//! Runs the same lifecycle as the generated bash routine: register the task
//! as an SSM managed instance, run the agent, and on SIGTERM/SIGINT delete
//! the activation, deregister the instance and stop the agent.
//!
//! The AWS calls and the agent binary sit behind [`ssm::ManagedInstanceApi`]
//! and [`agent::AgentRuntime`], so [`supervisor::Supervisor`] can be driven
//! by fakes in tests.

#![deny(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod agent;
pub mod env;
pub mod error;
pub mod metadata;
pub mod ssm;
pub mod supervisor;

pub use agent::{AgentExit, AgentProcess, AgentRuntime, NativeAgent};
pub use env::SidecarEnv;
pub use error::{Result, SidecarError};
pub use ssm::{Activation, ActivationTag, AwsCli, ManagedInstanceApi};
pub use supervisor::{Outcome, Supervisor, TeardownReport};
