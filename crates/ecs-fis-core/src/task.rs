//! Fargate task definition model
//!
//! Holds the subset of `AWS::ECS::TaskDefinition` the fault injection setup
//! reads and writes: network mode, PID mode, the fault injection flag, the
//! task role and the container list. A task can be built in code or loaded
//! from a JSON description (see [`TaskDefinitionInput`]).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{FisError, Result};
use crate::iam::{PolicyStatement, Role};
use crate::stack::{logical_id, Stack, Token};
use crate::validator::TaskRuntimeSnapshot;

/// Trust principal of task and execution roles
pub const ECS_TASKS_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";

/// Network transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No external networking
    None,
    /// Docker bridge shared with the host
    Bridge,
    /// Host network stack
    Host,
    /// Dedicated ENI per task (routable overlay)
    #[serde(rename = "awsvpc")]
    AwsVpc,
}

impl NetworkMode {
    /// Modes that give network fault actions a stack they can manipulate
    pub const ROUTABLE_ALTERNATIVES: [NetworkMode; 3] =
        [NetworkMode::AwsVpc, NetworkMode::Host, NetworkMode::None];

    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bridge => "bridge",
            Self::Host => "host",
            Self::AwsVpc => "awsvpc",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process namespace sharing mode
///
/// An absent mode means each container gets its own namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidMode {
    /// One namespace shared by every container of the task
    Task,
    /// The host's namespace
    Host,
}

impl PidMode {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Host => "host",
        }
    }
}

impl fmt::Display for PidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// awslogs driver binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDriver {
    /// Log group name
    pub group: Token,
    /// Stream prefix
    pub stream_prefix: String,
    /// Group ARN covering its streams; derived from the name in the stack's
    /// account and region when absent
    pub group_arn: Option<Token>,
    /// Region of the group; the stack region when absent
    pub region: Option<String>,
}

impl LogDriver {
    /// Group `group` in the stack's account and region
    pub fn new(group: Token, stream_prefix: impl Into<String>) -> Self {
        Self {
            group,
            stream_prefix: stream_prefix.into(),
            group_arn: None,
            region: None,
        }
    }

    /// Grant writes on this ARN instead of the derived one
    pub fn with_group_arn(mut self, arn: Token) -> Self {
        self.group_arn = Some(arn);
        self
    }

    /// Ship logs to another region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    fn streams_arn(&self) -> Token {
        self.group_arn
            .clone()
            .unwrap_or_else(|| log_group_arn_for_name(self.group.clone()))
    }
}

/// One container of the task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDefinition {
    /// Unique name within the task
    pub name: String,
    /// Image reference
    pub image: String,
    /// Whether the task stops when this container stops
    pub essential: bool,
    /// CPU units
    pub cpu: Option<u32>,
    /// Hard memory limit
    pub memory_mib: Option<u32>,
    /// Environment variables
    pub environment: BTreeMap<String, Token>,
    /// Command override
    pub command: Vec<String>,
    /// Container ports
    pub port_mappings: Vec<u16>,
    /// Log configuration
    pub logging: Option<LogDriver>,
}

impl ContainerDefinition {
    /// An essential container with no overrides
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            essential: true,
            cpu: None,
            memory_mib: None,
            environment: BTreeMap::new(),
            command: Vec::new(),
            port_mappings: Vec::new(),
            logging: None,
        }
    }

    /// Set whether the container is essential
    pub fn essential(mut self, essential: bool) -> Self {
        self.essential = essential;
        self
    }

    /// Set CPU units
    pub fn cpu(mut self, cpu: u32) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Set the memory limit
    pub fn memory_mib(mut self, memory: u32) -> Self {
        self.memory_mib = Some(memory);
        self
    }

    /// Add an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<Token>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Set the command
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Expose a container port
    pub fn port(mut self, port: u16) -> Self {
        self.port_mappings.push(port);
        self
    }

    /// Send output to CloudWatch Logs
    pub fn logging(mut self, driver: LogDriver) -> Self {
        self.logging = Some(driver);
        self
    }

    fn to_json(&self, stack: &Stack) -> Value {
        let mut def = json!({
            "Name": self.name,
            "Image": self.image,
            "Essential": self.essential,
        });

        if let Some(cpu) = self.cpu {
            def["Cpu"] = json!(cpu);
        }
        if let Some(memory) = self.memory_mib {
            def["Memory"] = json!(memory);
        }
        if !self.environment.is_empty() {
            let env: Vec<Value> = self
                .environment
                .iter()
                .map(|(name, value)| json!({ "Name": name, "Value": value }))
                .collect();
            def["Environment"] = json!(env);
        }
        if !self.command.is_empty() {
            def["Command"] = json!(self.command);
        }
        if !self.port_mappings.is_empty() {
            let ports: Vec<Value> = self
                .port_mappings
                .iter()
                .map(|port| json!({ "ContainerPort": port, "Protocol": "tcp" }))
                .collect();
            def["PortMappings"] = json!(ports);
        }
        if let Some(driver) = &self.logging {
            def["LogConfiguration"] = json!({
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": driver.group,
                    "awslogs-stream-prefix": driver.stream_prefix,
                    "awslogs-region": driver
                        .region
                        .as_deref()
                        .map_or_else(|| stack.region_token(), Token::literal),
                },
            });
        }

        def
    }
}

/// A Fargate task definition
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    logical_id: String,
    family: String,
    cpu: u32,
    memory_mib: u32,
    network_mode: Option<NetworkMode>,
    pid_mode: Option<PidMode>,
    enable_fault_injection: bool,
    task_role: Role,
    execution_role: Option<Role>,
    containers: Vec<ContainerDefinition>,
}

impl TaskDefinition {
    /// A Fargate task with `awsvpc` networking and its own task role
    pub fn fargate(id: impl Into<String>, family: impl Into<String>) -> Self {
        let id: String = id.into();
        let task_role = Role::new(logical_id(&[&id, "TaskRole"]), ECS_TASKS_PRINCIPAL);
        Self {
            family: family.into(),
            cpu: 256,
            memory_mib: 512,
            network_mode: Some(NetworkMode::AwsVpc),
            pid_mode: None,
            enable_fault_injection: false,
            task_role,
            execution_role: None,
            containers: Vec::new(),
            logical_id: id,
        }
    }

    /// Set CPU units
    pub fn with_cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// Set memory
    pub fn with_memory_mib(mut self, memory: u32) -> Self {
        self.memory_mib = memory;
        self
    }

    /// Set or clear the network mode
    pub fn with_network_mode(mut self, mode: Option<NetworkMode>) -> Self {
        self.network_mode = mode;
        self
    }

    /// Set or clear the PID mode
    pub fn with_pid_mode(mut self, mode: Option<PidMode>) -> Self {
        self.pid_mode = mode;
        self
    }

    /// Replace the task role, e.g. with an imported one
    pub fn with_task_role(mut self, role: Role) -> Self {
        self.task_role = role;
        self
    }

    /// Build from a JSON description
    pub fn from_input(input: TaskDefinitionInput) -> Result<Self> {
        let id = input
            .logical_id
            .clone()
            .unwrap_or_else(|| logical_id(&[&input.family, "TaskDef"]));

        let mut task = Self::fargate(&id, &input.family)
            .with_cpu(input.cpu)
            .with_memory_mib(input.memory)
            .with_network_mode(input.network_mode)
            .with_pid_mode(input.pid_mode);

        if let Some(arn) = &input.task_role_arn {
            task.task_role = Role::from_arn(logical_id(&[&id, "TaskRole"]), arn)?;
        }

        for container in input.containers {
            task.add_container(container.into_definition())?;
        }

        Ok(task)
    }

    /// Logical id in the template
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Family name
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Current network mode
    pub fn network_mode(&self) -> Option<NetworkMode> {
        self.network_mode
    }

    /// Current PID mode
    pub fn pid_mode(&self) -> Option<PidMode> {
        self.pid_mode
    }

    pub(crate) fn set_pid_mode(&mut self, mode: PidMode) {
        self.pid_mode = Some(mode);
    }

    /// Whether the fault injection capability flag is set
    pub fn fault_injection_enabled(&self) -> bool {
        self.enable_fault_injection
    }

    pub(crate) fn enable_fault_injection(&mut self) {
        self.enable_fault_injection = true;
    }

    /// Role assumed by the task's containers
    pub fn task_role(&self) -> &Role {
        &self.task_role
    }

    /// Mutable task role, for adding grants
    pub fn task_role_mut(&mut self) -> &mut Role {
        &mut self.task_role
    }

    /// Execution role, if a log driver or image pull needed one
    pub fn execution_role(&self) -> Option<&Role> {
        self.execution_role.as_ref()
    }

    /// Execution role, created on first use
    pub fn obtain_execution_role(&mut self) -> &mut Role {
        let id = logical_id(&[&self.logical_id, "ExecutionRole"]);
        self.execution_role
            .get_or_insert_with(|| Role::new(id, ECS_TASKS_PRINCIPAL))
    }

    /// Containers in declaration order
    pub fn containers(&self) -> &[ContainerDefinition] {
        &self.containers
    }

    /// Look up a container by name
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Add a container; names must be unique
    ///
    /// Containers logging to CloudWatch get the execution role write access
    /// their log driver needs.
    pub fn add_container(&mut self, container: ContainerDefinition) -> Result<()> {
        if self.container(&container.name).is_some() {
            return Err(FisError::DuplicateContainer(container.name));
        }

        if let Some(driver) = &container.logging {
            let streams = driver.streams_arn();
            self.obtain_execution_role().add_to_policy(PolicyStatement::allow(
                ["logs:CreateLogStream", "logs:PutLogEvents"],
                [streams],
            ));
        }

        tracing::debug!("Container {} added to task {}", container.name, self.family);
        self.containers.push(container);
        Ok(())
    }

    /// Immutable view of the fields fault preconditions depend on
    pub fn snapshot(&self) -> TaskRuntimeSnapshot {
        TaskRuntimeSnapshot {
            network_mode: self.network_mode,
            pid_mode: self.pid_mode,
        }
    }

    /// Resources for the task, its roles and their policies
    pub fn to_resources(&self, stack: &Stack) -> Vec<(String, Value)> {
        let mut resources = self.task_role.to_resources(stack);
        if let Some(execution_role) = &self.execution_role {
            resources.extend(execution_role.to_resources(stack));
        }

        let containers: Vec<Value> = self.containers.iter().map(|c| c.to_json(stack)).collect();
        let mut properties = json!({
            "Family": self.family,
            "Cpu": self.cpu.to_string(),
            "Memory": self.memory_mib.to_string(),
            "RequiresCompatibilities": ["FARGATE"],
            "TaskRoleArn": self.task_role.arn(),
            "ContainerDefinitions": containers,
        });
        if let Some(mode) = self.network_mode {
            properties["NetworkMode"] = json!(mode);
        }
        if let Some(mode) = self.pid_mode {
            properties["PidMode"] = json!(mode);
        }
        if self.enable_fault_injection {
            properties["EnableFaultInjection"] = json!(true);
        }
        if let Some(execution_role) = &self.execution_role {
            properties["ExecutionRoleArn"] = json!(execution_role.arn());
        }

        resources.push((
            self.logical_id.clone(),
            json!({ "Type": "AWS::ECS::TaskDefinition", "Properties": properties }),
        ));
        resources
    }
}

fn log_group_arn_for_name(group: Token) -> Token {
    match group {
        Token::Ref { target } => Token::get_att(target, "Arn"),
        other => Token::join([
            Token::literal("arn:"),
            Token::reference("AWS::Partition"),
            Token::literal(":logs:"),
            Token::reference("AWS::Region"),
            Token::literal(":"),
            Token::reference("AWS::AccountId"),
            Token::literal(":log-group:"),
            other,
            Token::literal(":*"),
        ]),
    }
}

/// JSON description of a task definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionInput {
    /// Logical id; derived from the family when absent
    #[serde(default)]
    pub logical_id: Option<String>,
    /// Family name
    pub family: String,
    /// CPU units
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// Memory
    #[serde(default = "default_memory")]
    pub memory: u32,
    /// Network mode; absent means unset
    #[serde(default)]
    pub network_mode: Option<NetworkMode>,
    /// PID mode; absent means per-container
    #[serde(default)]
    pub pid_mode: Option<PidMode>,
    /// Existing task role to import
    #[serde(default)]
    pub task_role_arn: Option<String>,
    /// Containers
    #[serde(default)]
    pub containers: Vec<ContainerInput>,
}

fn default_cpu() -> u32 {
    256
}

fn default_memory() -> u32 {
    512
}

/// JSON description of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInput {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Essential flag
    #[serde(default = "default_essential")]
    pub essential: bool,
    /// CPU units
    #[serde(default)]
    pub cpu: Option<u32>,
    /// Memory limit
    #[serde(default)]
    pub memory: Option<u32>,
    /// Environment
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Command
    #[serde(default)]
    pub command: Vec<String>,
    /// Container ports
    #[serde(default)]
    pub ports: Vec<u16>,
}

fn default_essential() -> bool {
    true
}

impl ContainerInput {
    fn into_definition(self) -> ContainerDefinition {
        let mut def = ContainerDefinition::new(self.name, self.image)
            .essential(self.essential)
            .command(self.command);
        def.cpu = self.cpu;
        def.memory_mib = self.memory;
        def.port_mappings = self.ports;
        def.environment = self
            .environment
            .into_iter()
            .map(|(k, v)| (k, Token::Literal(v)))
            .collect();
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_task() -> TaskDefinition {
        let mut task = TaskDefinition::fargate("TestTaskDef", "test");
        task.add_container(
            ContainerDefinition::new("web", "amazon/amazon-ecs-sample")
                .memory_mib(256)
                .cpu(128),
        )
        .unwrap();
        task
    }

    #[test]
    fn test_fargate_defaults() {
        let task = web_task();
        assert_eq!(task.network_mode(), Some(NetworkMode::AwsVpc));
        assert_eq!(task.pid_mode(), None);
        assert!(!task.fault_injection_enabled());
        assert_eq!(task.task_role().logical_id(), "TestTaskDefTaskRole");
        assert!(task.execution_role().is_none());
    }

    #[test]
    fn test_duplicate_container_rejected() {
        let mut task = web_task();
        let err = task
            .add_container(ContainerDefinition::new("web", "nginx"))
            .unwrap_err();
        assert!(matches!(err, FisError::DuplicateContainer(name) if name == "web"));
        assert_eq!(task.containers().len(), 1);
    }

    #[test]
    fn test_logging_container_gets_execution_role() {
        let mut task = web_task();
        task.add_container(
            ContainerDefinition::new("app", "nginx")
                .logging(LogDriver::new(Token::reference("Logs"), "app")),
        )
        .unwrap();

        let execution_role = task.execution_role().unwrap();
        assert_eq!(execution_role.statements().len(), 1);
        assert_eq!(
            execution_role.statements()[0].resource,
            vec![Token::get_att("Logs", "Arn")]
        );
    }

    #[test]
    fn test_cross_region_log_driver() {
        let stack = Stack::new("TestStack");
        let arn = "arn:aws:logs:eu-west-1:210987654321:log-group:/shared/agents:*";
        let mut task = web_task();
        task.add_container(
            ContainerDefinition::new("app", "nginx").logging(
                LogDriver::new(Token::literal("/shared/agents"), "app")
                    .with_group_arn(Token::literal(arn))
                    .with_region("eu-west-1"),
            ),
        )
        .unwrap();

        let execution_role = task.execution_role().unwrap();
        assert_eq!(execution_role.statements()[0].resource, vec![Token::literal(arn)]);

        let json = task.container("app").unwrap().to_json(&stack);
        let options = &json["LogConfiguration"]["Options"];
        assert_eq!(options["awslogs-region"], "eu-west-1");
        assert_eq!(options["awslogs-group"], "/shared/agents");
    }

    #[test]
    fn test_render_task_definition() {
        let stack = Stack::new("TestStack");
        let mut task = web_task();
        task.enable_fault_injection();
        task.set_pid_mode(PidMode::Task);

        let resources = task.to_resources(&stack);
        let (_, task_def) = resources
            .iter()
            .find(|(_, r)| r["Type"] == "AWS::ECS::TaskDefinition")
            .unwrap();
        let props = &task_def["Properties"];

        assert_eq!(props["RequiresCompatibilities"], json!(["FARGATE"]));
        assert_eq!(props["PidMode"], "task");
        assert_eq!(props["NetworkMode"], "awsvpc");
        assert_eq!(props["EnableFaultInjection"], true);
        assert_eq!(props["ContainerDefinitions"][0]["Name"], "web");
        assert_eq!(props["ContainerDefinitions"][0]["Memory"], 256);
    }

    #[test]
    fn test_from_input() {
        let input: TaskDefinitionInput = serde_json::from_value(json!({
            "family": "orders",
            "networkMode": "bridge",
            "taskRoleArn": "arn:aws:iam::123456789012:role/orders-task",
            "containers": [
                { "name": "web", "image": "nginx", "ports": [80], "environment": {"MODE": "prod"} }
            ]
        }))
        .unwrap();

        let task = TaskDefinition::from_input(input).unwrap();
        assert_eq!(task.logical_id(), "ordersTaskDef");
        assert_eq!(task.network_mode(), Some(NetworkMode::Bridge));
        assert!(task.task_role().is_imported());
        assert_eq!(task.container("web").unwrap().port_mappings, vec![80]);
    }

    #[test]
    fn test_from_input_without_network_mode_is_unset() {
        let input: TaskDefinitionInput =
            serde_json::from_value(json!({ "family": "batch" })).unwrap();
        let task = TaskDefinition::from_input(input).unwrap();
        assert_eq!(task.network_mode(), None);
    }

    #[test]
    fn test_from_input_rejects_bad_role_arn() {
        let input: TaskDefinitionInput = serde_json::from_value(json!({
            "family": "orders",
            "taskRoleArn": "orders-task"
        }))
        .unwrap();
        assert!(matches!(
            TaskDefinition::from_input(input),
            Err(FisError::InvalidArn(_))
        ));
    }
}
