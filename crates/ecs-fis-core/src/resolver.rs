//! Precondition Resolver
//!
//! Maps requested fault kinds to the runtime preconditions the task must
//! satisfy. The result is the union of each kind's row in [`preconditions_for`],
//! so adding kinds can only add preconditions.

use crate::action::{FaultActionKind, FaultActionSet, PreconditionSet, RuntimePrecondition};

const SHARED_PID: &[RuntimePrecondition] = &[RuntimePrecondition::RequiresSharedProcessNamespace];

const SHARED_PID_AND_ROUTABLE: &[RuntimePrecondition] = &[
    RuntimePrecondition::RequiresSharedProcessNamespace,
    RuntimePrecondition::RequiresRoutableNetworkMode,
];

/// Preconditions required by a single kind
pub fn preconditions_for(kind: FaultActionKind) -> &'static [RuntimePrecondition] {
    match kind {
        FaultActionKind::CpuStress | FaultActionKind::IoStress => &[],
        FaultActionKind::KillProcess => SHARED_PID,
        FaultActionKind::NetworkBlackhole
        | FaultActionKind::NetworkLatency
        | FaultActionKind::NetworkPacketLoss => SHARED_PID_AND_ROUTABLE,
    }
}

/// Preconditions required by a whole request
pub fn resolve_preconditions(actions: &FaultActionSet) -> PreconditionSet {
    actions
        .iter()
        .flat_map(|kind| preconditions_for(kind).iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stress_kinds_need_nothing() {
        let set: FaultActionSet = [FaultActionKind::CpuStress, FaultActionKind::IoStress].into();
        assert!(resolve_preconditions(&set).is_empty());
    }

    #[test]
    fn test_kill_process_needs_shared_pid_only() {
        let set: FaultActionSet = [FaultActionKind::KillProcess].into();
        let resolved = resolve_preconditions(&set);

        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains(&RuntimePrecondition::RequiresSharedProcessNamespace));
    }

    #[test]
    fn test_network_kinds_need_both() {
        for kind in [
            FaultActionKind::NetworkBlackhole,
            FaultActionKind::NetworkLatency,
            FaultActionKind::NetworkPacketLoss,
        ] {
            let resolved = resolve_preconditions(&[kind].into());
            assert!(resolved.contains(&RuntimePrecondition::RequiresSharedProcessNamespace));
            assert!(resolved.contains(&RuntimePrecondition::RequiresRoutableNetworkMode));
        }
    }

    #[test]
    fn test_default_request_needs_everything() {
        let resolved = resolve_preconditions(&FaultActionSet::all());
        assert_eq!(resolved.len(), 2);
    }
}
