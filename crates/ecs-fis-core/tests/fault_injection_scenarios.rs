//! End-to-end attachment scenarios
//!
//! Each test builds a task, attaches fault injection and inspects both the
//! in-memory model and the rendered template.

use serde_json::{json, Value};

use ecs_fis_core::action::FaultActionKind;
use ecs_fis_core::construct::{synthesize, FaultInjection, FaultInjectionProps};
use ecs_fis_core::iam::Role;
use ecs_fis_core::logs::LogGroup;
use ecs_fis_core::stack::{Stack, Token};
use ecs_fis_core::task::{ContainerDefinition, NetworkMode, PidMode, TaskDefinition};
use ecs_fis_core::FisError;

const SIDECAR: &str = "amazon-ssm-agent";

fn stack() -> Stack {
    Stack::new("integ-ecs-fargate-task-fis").with_region("us-east-1")
}

fn task_with(network_mode: Option<NetworkMode>, pid_mode: Option<PidMode>) -> TaskDefinition {
    let mut task = TaskDefinition::fargate("TestTaskDef", "test")
        .with_network_mode(network_mode)
        .with_pid_mode(pid_mode);
    task.add_container(
        ContainerDefinition::new("web", "amazon/amazon-ecs-sample")
            .memory_mib(256)
            .cpu(128)
            .port(80),
    )
    .unwrap();
    task
}

fn task_properties(template: &Value) -> &Value {
    template["Resources"]
        .as_object()
        .unwrap()
        .values()
        .find(|r| r["Type"] == "AWS::ECS::TaskDefinition")
        .map(|r| &r["Properties"])
        .unwrap()
}

fn statements(template: &Value, policy_id: &str) -> Vec<Value> {
    template["Resources"][policy_id]["Properties"]["PolicyDocument"]["Statement"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

fn has_action(statements: &[Value], action: &str) -> bool {
    statements.iter().any(|s| match &s["Action"] {
        Value::String(a) => a == action,
        Value::Array(actions) => actions.iter().any(|a| a == action),
        _ => false,
    })
}

#[test]
fn bridge_task_with_network_fault_is_rejected_untouched() {
    let mut task = task_with(Some(NetworkMode::Bridge), None);
    let props = FaultInjectionProps::new().with_fault_actions([FaultActionKind::NetworkBlackhole]);

    let err = FaultInjection::apply(&stack(), "TestConstruct", &mut task, props).unwrap_err();

    assert!(err.is_validation());
    let message = err.to_string();
    assert!(message.contains("bridge"));
    for alternative in ["awsvpc", "host", "none"] {
        assert!(message.contains(alternative), "{message}");
    }

    assert!(task.container(SIDECAR).is_none());
    assert!(!task.fault_injection_enabled());
    assert_eq!(task.pid_mode(), None);
    assert!(task.task_role().statements().is_empty());
    assert!(task.execution_role().is_none());
}

#[test]
fn bridge_task_with_non_network_faults_is_accepted() {
    let mut task = task_with(Some(NetworkMode::Bridge), None);
    let props = FaultInjectionProps::new()
        .with_fault_actions([FaultActionKind::CpuStress, FaultActionKind::KillProcess]);

    FaultInjection::apply(&stack(), "TestConstruct", &mut task, props).unwrap();

    assert_eq!(task.network_mode(), Some(NetworkMode::Bridge));
    assert_eq!(task.pid_mode(), Some(PidMode::Task));
    assert!(task.container(SIDECAR).is_some());
}

#[test]
fn host_and_none_network_modes_pass_through() {
    for mode in [NetworkMode::Host, NetworkMode::None] {
        let mut task = task_with(Some(mode), None);
        FaultInjection::apply(&stack(), "TestConstruct", &mut task, FaultInjectionProps::new())
            .unwrap();

        assert_eq!(task.network_mode(), Some(mode));
        assert_eq!(task.pid_mode(), Some(PidMode::Task));
    }
}

#[test]
fn cpu_stress_on_unset_modes_attaches_one_sidecar() {
    let stack = stack();
    let mut task = task_with(None, None);
    let props = FaultInjectionProps::new().with_fault_actions([FaultActionKind::CpuStress]);

    let fis = FaultInjection::apply(&stack, "TestConstruct", &mut task, props).unwrap();

    assert_eq!(task.network_mode(), None);
    assert_eq!(task.pid_mode(), None);
    assert!(task.fault_injection_enabled());
    assert_eq!(
        task.containers().iter().filter(|c| c.name == SIDECAR).count(),
        1
    );

    let template = synthesize(&stack, &task, &fis).unwrap().render();
    let props = task_properties(&template);
    assert_eq!(props["EnableFaultInjection"], true);
    assert!(props.get("PidMode").is_none());
    assert!(props.get("NetworkMode").is_none());

    let agent = &template["Resources"]["TestConstructSSMRole"]["Properties"];
    assert_eq!(agent["Description"], "Role used by SSM agent for ECS Fault Injection");
    assert_eq!(
        agent["ManagedPolicyArns"][0]["Fn::Join"][1][2],
        ":iam::aws:policy/AmazonSSMManagedInstanceCore"
    );

    let agent_statements = statements(&template, "TestConstructSSMRoleDefaultPolicy");
    assert!(has_action(&agent_statements, "logs:PutLogEvents"));
    assert!(has_action(&agent_statements, "ssm:DeleteActivation"));
}

#[test]
fn kill_process_patches_per_container_pid_mode() {
    let mut task = task_with(Some(NetworkMode::AwsVpc), None);
    let props = FaultInjectionProps::new().with_fault_actions([FaultActionKind::KillProcess]);

    FaultInjection::apply(&stack(), "TestConstruct", &mut task, props).unwrap();

    assert_eq!(task.pid_mode(), Some(PidMode::Task));
}

#[test]
fn default_request_renders_full_setup() {
    let stack = stack();
    let mut task = task_with(Some(NetworkMode::AwsVpc), None);
    let fis = FaultInjection::apply(&stack, "TestConstruct", &mut task, FaultInjectionProps::new())
        .unwrap();

    let template = synthesize(&stack, &task, &fis).unwrap().render();
    let props = task_properties(&template);
    assert_eq!(props["PidMode"], "task");
    assert_eq!(props["NetworkMode"], "awsvpc");
    assert_eq!(props["EnableFaultInjection"], true);

    let sidecar = props["ContainerDefinitions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["Name"] == SIDECAR)
        .unwrap();
    assert_eq!(sidecar["Essential"], false);
    assert_eq!(sidecar["Cpu"], 0);
    assert_eq!(
        sidecar["Environment"],
        json!([{ "Name": "MANAGED_INSTANCE_ROLE_NAME", "Value": { "Ref": "TestConstructSSMRole" } }])
    );
    assert_eq!(sidecar["LogConfiguration"]["LogDriver"], "awslogs");
    assert_eq!(
        sidecar["LogConfiguration"]["Options"]["awslogs-stream-prefix"],
        "ssm-agent"
    );
    assert_eq!(sidecar["LogConfiguration"]["Options"]["awslogs-region"], "us-east-1");

    let logs = &template["Resources"]["TestConstructSSMAgentLogs"];
    assert_eq!(
        logs["Properties"]["LogGroupName"],
        "/aws/ecs/fis/integ-ecs-fargate-task-fis/TestConstruct"
    );
    assert_eq!(logs["Properties"]["RetentionInDays"], 7);
    assert_eq!(logs["DeletionPolicy"], "Delete");

    let task_statements = statements(&template, "TestTaskDefTaskRoleDefaultPolicy");
    assert!(has_action(&task_statements, "ssm:CreateActivation"));
    assert!(has_action(&task_statements, "ssm:AddTagsToResource"));
    assert!(has_action(&task_statements, "iam:PassRole"));
    assert!(has_action(&task_statements, "iam:GetRole"));

    let agent_statements = statements(&template, "TestConstructSSMRoleDefaultPolicy");
    let deregister = agent_statements
        .iter()
        .find(|s| s["Action"] == "ssm:DeregisterManagedInstance")
        .unwrap();
    assert_eq!(
        deregister["Resource"]["Fn::Join"][1][2],
        ":ssm:us-east-1:*:managed-instance/*"
    );
}

#[test]
fn supplied_agent_role_gets_only_logging_grant() {
    let stack = stack();
    let mut task = task_with(Some(NetworkMode::AwsVpc), None);
    let role = Role::from_arn("SuppliedAgent", "arn:aws:iam::123456789012:role/fis-agent").unwrap();
    let props = FaultInjectionProps::new().with_agent_role(role);

    let fis = FaultInjection::apply(&stack, "TestConstruct", &mut task, props).unwrap();
    assert!(fis.agent_role().is_imported());

    let template = synthesize(&stack, &task, &fis).unwrap().render();
    assert!(template["Resources"].get("TestConstructSSMRole").is_none());
    assert!(template["Resources"].get("SuppliedAgent").is_none());

    let agent_statements = statements(&template, "SuppliedAgentDefaultPolicy");
    assert_eq!(agent_statements.len(), 1);
    assert!(has_action(&agent_statements, "logs:CreateLogStream"));
    assert_eq!(
        template["Resources"]["SuppliedAgentDefaultPolicy"]["Properties"]["Roles"],
        json!(["fis-agent"])
    );

    let task_statements = statements(&template, "TestTaskDefTaskRoleDefaultPolicy");
    let pass_role = task_statements
        .iter()
        .find(|s| s["Action"] == json!(["iam:GetRole", "iam:PassRole"]))
        .unwrap();
    assert_eq!(pass_role["Resource"], "arn:aws:iam::123456789012:role/fis-agent");

    let sidecar = task.container(SIDECAR).unwrap();
    assert_eq!(
        sidecar.environment.get("MANAGED_INSTANCE_ROLE_NAME"),
        Some(&Token::literal("fis-agent"))
    );
}

#[test]
fn supplied_log_group_is_not_rendered() {
    let stack = stack();
    let mut task = task_with(Some(NetworkMode::AwsVpc), None);
    let log_group = LogGroup::from_arn(
        "SharedLogs",
        "arn:aws:logs:us-east-1:123456789012:log-group:/shared/fis:*",
    )
    .unwrap();
    let props = FaultInjectionProps::new().with_log_group(log_group);

    let fis = FaultInjection::apply(&stack, "TestConstruct", &mut task, props).unwrap();
    let template = synthesize(&stack, &task, &fis).unwrap();

    assert_eq!(template.resources_of_type("AWS::Logs::LogGroup").count(), 0);
    let driver = task.container(SIDECAR).unwrap().logging.as_ref().unwrap();
    assert_eq!(driver.group, Token::literal("/shared/fis"));
}

#[test]
fn cross_region_log_group_keeps_its_region_and_account() {
    let stack = stack();
    let mut task = task_with(Some(NetworkMode::AwsVpc), None);
    let arn = "arn:aws:logs:eu-west-1:210987654321:log-group:/shared/fis:*";
    let props =
        FaultInjectionProps::new().with_log_group(LogGroup::from_arn("SharedLogs", arn).unwrap());

    let fis = FaultInjection::apply(&stack, "TestConstruct", &mut task, props).unwrap();
    let template = synthesize(&stack, &task, &fis).unwrap().render();

    let sidecar = task_properties(&template)["ContainerDefinitions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["Name"] == SIDECAR)
        .unwrap()
        .clone();
    let options = &sidecar["LogConfiguration"]["Options"];
    assert_eq!(options["awslogs-group"], "/shared/fis");
    assert_eq!(options["awslogs-region"], "eu-west-1");

    let execution = statements(&template, "TestTaskDefExecutionRoleDefaultPolicy");
    assert!(has_action(&execution, "logs:PutLogEvents"));
    assert!(execution.iter().all(|s| s["Resource"] == arn));
}

#[test]
fn malformed_role_handle_propagates() {
    let err = Role::from_arn("Agent", "fis-agent").unwrap_err();
    assert!(matches!(err, FisError::InvalidArn(_)));
}

#[test]
fn network_blackhole_port_tag_accepted() {
    let kind: FaultActionKind = "network-blackhole-port".parse().unwrap();
    assert_eq!(kind, FaultActionKind::NetworkBlackhole);
}
