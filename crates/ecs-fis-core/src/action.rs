//! Fault action kinds and the runtime preconditions they imply
//!
//! A [`FaultActionKind`] names one experiment type that AWS FIS can run
//! against an ECS task. Callers hand us a set of them; order does not matter
//! and duplicates collapse, so the set is backed by a `BTreeSet`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::FisError;

/// One fault-injection experiment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultActionKind {
    /// CPU stress test
    CpuStress,

    /// IO stress test
    IoStress,

    /// Process termination
    KillProcess,

    /// Network black hole on a port
    #[serde(alias = "network-blackhole-port")]
    NetworkBlackhole,

    /// Network latency
    NetworkLatency,

    /// Network packet loss
    NetworkPacketLoss,
}

impl FaultActionKind {
    /// Every known kind. This is the default request when the caller names none.
    pub const ALL: [FaultActionKind; 6] = [
        FaultActionKind::CpuStress,
        FaultActionKind::IoStress,
        FaultActionKind::KillProcess,
        FaultActionKind::NetworkBlackhole,
        FaultActionKind::NetworkLatency,
        FaultActionKind::NetworkPacketLoss,
    ];

    /// Canonical tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuStress => "cpu-stress",
            Self::IoStress => "io-stress",
            Self::KillProcess => "kill-process",
            Self::NetworkBlackhole => "network-blackhole",
            Self::NetworkLatency => "network-latency",
            Self::NetworkPacketLoss => "network-packet-loss",
        }
    }

    /// True for the kinds that manipulate the task's network stack
    pub fn targets_network(&self) -> bool {
        matches!(
            self,
            Self::NetworkBlackhole | Self::NetworkLatency | Self::NetworkPacketLoss
        )
    }
}

impl fmt::Display for FaultActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultActionKind {
    type Err = FisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cpu-stress" => Ok(Self::CpuStress),
            "io-stress" => Ok(Self::IoStress),
            "kill-process" => Ok(Self::KillProcess),
            "network-blackhole" | "network-blackhole-port" => Ok(Self::NetworkBlackhole),
            "network-latency" => Ok(Self::NetworkLatency),
            "network-packet-loss" => Ok(Self::NetworkPacketLoss),
            other => Err(FisError::UnknownFaultAction(other.to_string())),
        }
    }
}

/// A set of requested fault actions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaultActionSet(BTreeSet<FaultActionKind>);

impl FaultActionSet {
    /// The full set of known kinds
    pub fn all() -> Self {
        FaultActionKind::ALL.into_iter().collect()
    }

    /// Resolve a caller request: absent or empty means every known kind
    pub fn requested_or_all(requested: Option<FaultActionSet>) -> Self {
        match requested {
            Some(set) if !set.is_empty() => set,
            _ => Self::all(),
        }
    }

    /// Whether the set contains a kind
    pub fn contains(&self, kind: FaultActionKind) -> bool {
        self.0.contains(&kind)
    }

    /// Number of distinct kinds
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no kind was requested
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate kinds in canonical order
    pub fn iter(&self) -> impl Iterator<Item = FaultActionKind> + '_ {
        self.0.iter().copied()
    }

    /// Requested kinds that target the network stack
    pub fn network_actions(&self) -> Vec<FaultActionKind> {
        self.iter().filter(FaultActionKind::targets_network).collect()
    }
}

impl FromIterator<FaultActionKind> for FaultActionSet {
    fn from_iter<I: IntoIterator<Item = FaultActionKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[FaultActionKind; N]> for FaultActionSet {
    fn from(kinds: [FaultActionKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl fmt::Display for FaultActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.iter().map(|k| k.as_str()).collect();
        write!(f, "{{{}}}", tags.join(", "))
    }
}

/// Runtime capability a task must offer before a fault kind can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimePrecondition {
    /// Containers must share one process namespace (`pidMode: task`)
    RequiresSharedProcessNamespace,

    /// The network mode must give the task its own routable stack
    RequiresRoutableNetworkMode,
}

impl RuntimePrecondition {
    /// Canonical tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresSharedProcessNamespace => "requires-shared-process-namespace",
            Self::RequiresRoutableNetworkMode => "requires-routable-network-mode",
        }
    }
}

impl fmt::Display for RuntimePrecondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved preconditions for a request
pub type PreconditionSet = BTreeSet<RuntimePrecondition>;
