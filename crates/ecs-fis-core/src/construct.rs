//! Fault injection attachment for a Fargate task
//!
//! [`FaultInjection::apply`] wires the whole setup onto a task in one pass:
//!
//! 1. resolve the preconditions of the requested fault kinds
//! 2. plan the task patch, failing on an incompatible network mode
//! 3. patch the task (PID mode, fault injection flag)
//! 4. create or adopt the log group and the agent role
//! 5. grant the task role and the agent role what they need
//! 6. add the SSM agent sidecar running the lifecycle script, or the
//!    `ecs-fis-sidecar` supervisor with the native runtime
//!
//! Every check happens before step 3, so an error leaves the task exactly as
//! it was handed in.
//!
//! # Example
//!
//! ```
//! use ecs_fis_core::action::FaultActionKind;
//! use ecs_fis_core::construct::{FaultInjection, FaultInjectionProps};
//! use ecs_fis_core::stack::Stack;
//! use ecs_fis_core::task::{ContainerDefinition, TaskDefinition};
//!
//! let stack = Stack::new("integ-ecs-fargate-task-fis");
//! let mut task = TaskDefinition::fargate("TaskDef", "web");
//! task.add_container(ContainerDefinition::new("web", "amazon/amazon-ecs-sample")).unwrap();
//!
//! let props = FaultInjectionProps::new().with_fault_actions([FaultActionKind::CpuStress]);
//! let fis = FaultInjection::apply(&stack, "FaultInjection", &mut task, props).unwrap();
//!
//! assert!(task.fault_injection_enabled());
//! assert!(task.container("amazon-ssm-agent").is_some());
//! assert!(!fis.agent_role().is_imported());
//! ```

use crate::action::{FaultActionSet, PreconditionSet};
use crate::config::{FisConfig, SidecarRuntime, SidecarSettings, SETTINGS_ENV_VAR};
use crate::error::{FisError, Result};
use crate::iam::Role;
use crate::logs::LogGroup;
use crate::permissions::{apply_grants, compose_grants, GrantContext};
use crate::resolver::resolve_preconditions;
use crate::script::{assemble, container_command};
use crate::stack::{logical_id, Stack};
use crate::task::{ContainerDefinition, TaskDefinition};
use crate::template::Template;
use crate::validator::plan;

/// Options for [`FaultInjection::apply`]
#[derive(Debug, Clone, Default)]
pub struct FaultInjectionProps {
    /// Fault kinds the task must support; every kind when absent or empty
    pub fault_actions: Option<FaultActionSet>,

    /// Existing log group for the sidecar; a new one is created when absent
    pub log_group: Option<LogGroup>,

    /// Existing agent role; a new one is created when absent
    pub agent_role: Option<Role>,

    /// Sidecar, log and role settings
    pub config: FisConfig,
}

impl FaultInjectionProps {
    /// Defaults: every fault kind, new log group, new agent role
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the fault kinds
    pub fn with_fault_actions(mut self, actions: impl Into<FaultActionSet>) -> Self {
        self.fault_actions = Some(actions.into());
        self
    }

    /// Use an existing log group
    pub fn with_log_group(mut self, log_group: LogGroup) -> Self {
        self.log_group = Some(log_group);
        self
    }

    /// Use an existing agent role
    pub fn with_agent_role(mut self, role: Role) -> Self {
        self.agent_role = Some(role);
        self
    }

    /// Override settings
    pub fn with_config(mut self, config: FisConfig) -> Self {
        self.config = config;
        self
    }
}

/// Result of attaching fault injection to a task
#[derive(Debug, Clone)]
pub struct FaultInjection {
    id: String,
    agent_role: Role,
    log_group: LogGroup,
    fault_actions: FaultActionSet,
    preconditions: PreconditionSet,
}

impl FaultInjection {
    /// Attach fault injection support to `task`
    pub fn apply(
        stack: &Stack,
        id: &str,
        task: &mut TaskDefinition,
        props: FaultInjectionProps,
    ) -> Result<Self> {
        let FaultInjectionProps {
            fault_actions,
            log_group,
            agent_role,
            config,
        } = props;

        let fault_actions = FaultActionSet::requested_or_all(fault_actions);
        let preconditions = resolve_preconditions(&fault_actions);
        let patch = plan(&task.snapshot(), &preconditions)?;

        config.validate()?;
        let sidecar = &config.sidecar;
        let container = sidecar_container(sidecar)?;
        if task.container(&sidecar.container_name).is_some() {
            return Err(FisError::DuplicateContainer(sidecar.container_name.clone()));
        }

        tracing::info!(
            "Enabling fault injection {} on task {}",
            fault_actions,
            task.family()
        );
        patch.apply(task);

        let log_group = log_group.unwrap_or_else(|| {
            LogGroup::for_construct(
                logical_id(&[id, "SSMAgentLogs"]),
                stack,
                id,
                &config.logs,
            )
        });

        let mut agent_role = agent_role.unwrap_or_else(|| {
            Role::new(
                logical_id(&[id, "SSMRole"]),
                &config.agent_role.service_principal,
            )
            .with_description(&config.agent_role.description)
        });

        let grants = compose_grants(&GrantContext {
            stack,
            agent_role: &agent_role,
            log_group: &log_group,
            managed_policy: &config.agent_role.managed_policy,
        });
        apply_grants(grants, task.task_role_mut(), &mut agent_role);

        let container = container
            .env(&sidecar.role_env_var, agent_role.name())
            .logging(log_group.driver(&sidecar.stream_prefix));
        task.add_container(container)?;

        Ok(Self {
            id: id.to_string(),
            agent_role,
            log_group,
            fault_actions,
            preconditions,
        })
    }

    /// Construct id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Role SSM assumes for the registered agent
    pub fn agent_role(&self) -> &Role {
        &self.agent_role
    }

    /// Log group receiving the sidecar output
    pub fn log_group(&self) -> &LogGroup {
        &self.log_group
    }

    /// Effective fault kinds
    pub fn fault_actions(&self) -> &FaultActionSet {
        &self.fault_actions
    }

    /// Preconditions applied to the task
    pub fn preconditions(&self) -> &PreconditionSet {
        &self.preconditions
    }

    /// Add the agent role, its policy and the log group to `template`
    ///
    /// Imported resources contribute only what the template has to own,
    /// e.g. the inline policy of an imported role.
    pub fn add_to_template(&self, stack: &Stack, template: &mut Template) -> Result<()> {
        template.extend(self.agent_role.to_resources(stack))?;
        if let Some((logical_id, resource)) = self.log_group.to_resource() {
            template.add_resource(logical_id, resource)?;
        }
        Ok(())
    }
}

/// Sidecar container without its role and log bindings
fn sidecar_container(sidecar: &SidecarSettings) -> Result<ContainerDefinition> {
    let container = ContainerDefinition::new(&sidecar.container_name, &sidecar.image)
        .essential(false)
        .cpu(0);

    Ok(match sidecar.runtime {
        SidecarRuntime::Script => container.command(container_command(assemble(sidecar)?)),
        SidecarRuntime::Native => container
            .env(SETTINGS_ENV_VAR, sidecar.to_json()?)
            .command([sidecar.supervisor_binary.as_str()]),
    })
}

/// Render a task and its fault injection setup as one template
pub fn synthesize(
    stack: &Stack,
    task: &TaskDefinition,
    fault_injection: &FaultInjection,
) -> Result<Template> {
    let mut template = Template::new();
    template.extend(task.to_resources(stack))?;
    fault_injection.add_to_template(stack, &mut template)?;
    Ok(template)
}
