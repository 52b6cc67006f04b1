//! Configuration Validator
//!
//! Planning is a pure function from a [`TaskRuntimeSnapshot`] and the resolved
//! preconditions to either a [`TaskPatch`] or a [`ValidationFailure`]. Nothing
//! touches the task until a plan has been produced, so a failure never leaves
//! a half-configured task behind.
//!
//! Process namespace sharing is always fixable and gets patched. Network mode
//! is only checked: a bridge task cannot host network faults, and any other
//! mode is taken to be the caller's deliberate choice.

use thiserror::Error;

use crate::action::{PreconditionSet, RuntimePrecondition};
use crate::task::{NetworkMode, PidMode, TaskDefinition};

/// The fields of a task that preconditions depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRuntimeSnapshot {
    /// Current network mode; `None` when unset
    pub network_mode: Option<NetworkMode>,
    /// Current PID mode; `None` when per-container
    pub pid_mode: Option<PidMode>,
}

/// Changes to apply to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPatch {
    /// New PID mode, when the current one does not satisfy the request
    pub pid_mode: Option<PidMode>,
    /// Mark the task as a fault injection target
    pub enable_fault_injection: bool,
}

impl TaskPatch {
    /// Apply the patch in place
    pub fn apply(&self, task: &mut TaskDefinition) {
        if let Some(mode) = self.pid_mode {
            tracing::info!(
                "Setting PID mode of task {} to {} (was {})",
                task.family(),
                mode,
                task.pid_mode().map_or("per-container", |m| m.as_str())
            );
            task.set_pid_mode(mode);
        }
        if self.enable_fault_injection {
            task.enable_fault_injection();
        }
    }
}

/// Why a task cannot host the requested fault actions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Network faults need a network stack of their own
    #[error(
        "Network-related fault injection actions cannot be used with {mode} network mode. \
         Please use {alternatives} network mode.",
        alternatives = alternatives_list()
    )]
    IncompatibleNetworkMode {
        /// The mode the task currently uses
        mode: NetworkMode,
    },
}

fn alternatives_list() -> String {
    let names: Vec<&str> = NetworkMode::ROUTABLE_ALTERNATIVES
        .iter()
        .map(|mode| mode.as_str())
        .collect();
    match names.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{}, or {}", rest.join(", "), last),
        _ => names.join(""),
    }
}

/// Decide what a task needs for the given preconditions
///
/// Validation runs first; the fault injection flag only appears in a plan
/// that passed it.
pub fn plan(
    snapshot: &TaskRuntimeSnapshot,
    preconditions: &PreconditionSet,
) -> Result<TaskPatch, ValidationFailure> {
    if preconditions.contains(&RuntimePrecondition::RequiresRoutableNetworkMode)
        && snapshot.network_mode == Some(NetworkMode::Bridge)
    {
        return Err(ValidationFailure::IncompatibleNetworkMode {
            mode: NetworkMode::Bridge,
        });
    }

    let pid_mode = if preconditions.contains(&RuntimePrecondition::RequiresSharedProcessNamespace)
        && snapshot.pid_mode != Some(PidMode::Task)
    {
        Some(PidMode::Task)
    } else {
        None
    };

    Ok(TaskPatch {
        pid_mode,
        enable_fault_injection: true,
    })
}
