//! Permission Composer
//!
//! Derives the grants that let the sidecar register itself as an SSM managed
//! instance and clean up after itself. Three parties are involved:
//!
//! - the task role, which creates the activation and passes the agent role
//! - the agent role, which SSM assumes on behalf of the registered agent
//! - the log group, which the agent role writes to
//!
//! An agent role supplied by the caller is presumed to already carry its
//! baseline and self-deregistration permissions, so only the logging grant
//! and the task role's pass/inspect grant reference it.

use crate::iam::{ManagedPolicy, PolicyStatement, Role};
use crate::logs::LogGroup;
use crate::stack::{Stack, Token};

/// Which identity receives a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grantee {
    /// The task role
    ExecutionIdentity,
    /// The role SSM assumes for the agent
    AgentIdentity,
}

/// What is granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Inline statement
    Statement(PolicyStatement),
    /// AWS managed policy
    ManagedPolicy(ManagedPolicy),
}

/// One grant to one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    /// Recipient
    pub grantee: Grantee,
    /// Permission
    pub grant: Grant,
}

impl PermissionGrant {
    fn statement(grantee: Grantee, statement: PolicyStatement) -> Self {
        Self {
            grantee,
            grant: Grant::Statement(statement),
        }
    }
}

/// Inputs of the composer
#[derive(Debug, Clone, Copy)]
pub struct GrantContext<'a> {
    /// Scope for region-bound resources
    pub stack: &'a Stack,
    /// Agent role, minted or supplied
    pub agent_role: &'a Role,
    /// Log destination of the sidecar
    pub log_group: &'a LogGroup,
    /// Baseline managed policy for a minted agent role
    pub managed_policy: &'a str,
}

/// Compute every grant for one construction
pub fn compose_grants(ctx: &GrantContext<'_>) -> Vec<PermissionGrant> {
    let any = || Token::literal("*");
    let mut grants = vec![
        // The activation does not exist until the sidecar runs.
        PermissionGrant::statement(
            Grantee::ExecutionIdentity,
            PolicyStatement::allow(["ssm:CreateActivation", "ssm:AddTagsToResource"], [any()]),
        ),
        PermissionGrant::statement(
            Grantee::ExecutionIdentity,
            PolicyStatement::allow(["iam:GetRole", "iam:PassRole"], [ctx.agent_role.arn()]),
        ),
    ];

    if !ctx.agent_role.is_imported() {
        grants.push(PermissionGrant {
            grantee: Grantee::AgentIdentity,
            grant: Grant::ManagedPolicy(ManagedPolicy::aws_managed(ctx.managed_policy)),
        });
        grants.push(PermissionGrant::statement(
            Grantee::AgentIdentity,
            PolicyStatement::allow(["ssm:DeleteActivation"], [any()]),
        ));
        grants.push(PermissionGrant::statement(
            Grantee::AgentIdentity,
            PolicyStatement::allow(
                ["ssm:DeregisterManagedInstance"],
                [ctx.stack.regional_arn("ssm", "*", "managed-instance/*")],
            ),
        ));
    }

    grants.push(PermissionGrant::statement(
        Grantee::AgentIdentity,
        PolicyStatement::allow(
            ["logs:CreateLogStream", "logs:PutLogEvents"],
            [ctx.log_group.arn()],
        ),
    ));

    grants
}

/// Attach grants to their identities
pub fn apply_grants(grants: Vec<PermissionGrant>, task_role: &mut Role, agent_role: &mut Role) {
    for PermissionGrant { grantee, grant } in grants {
        let role = match grantee {
            Grantee::ExecutionIdentity => &mut *task_role,
            Grantee::AgentIdentity => &mut *agent_role,
        };
        match grant {
            Grant::Statement(statement) => {
                tracing::debug!(
                    "Granting {:?} on {} resource(s) to {}",
                    statement.action,
                    statement.resource.len(),
                    role.logical_id()
                );
                role.add_to_policy(statement);
            }
            Grant::ManagedPolicy(policy) => {
                tracing::debug!("Attaching {} to {}", policy.name(), role.logical_id());
                role.add_managed_policy(policy);
            }
        }
    }
}
