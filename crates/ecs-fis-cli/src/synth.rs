//! `ecs-fis synth`: render a task definition with fault injection attached.
//!
//! Pipeline: task JSON → TaskDefinition → FaultInjection::apply → Template

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use ecs_fis_core::action::{FaultActionKind, FaultActionSet};
use ecs_fis_core::config::SidecarRuntime;
use ecs_fis_core::construct::{synthesize, FaultInjection, FaultInjectionProps};
use ecs_fis_core::iam::Role;
use ecs_fis_core::logs::LogGroup;
use ecs_fis_core::stack::{logical_id, Stack};
use ecs_fis_core::task::{TaskDefinition, TaskDefinitionInput};
use ecs_fis_core::template::Template;
use ecs_fis_core::FisConfig;

/// Options for the `ecs-fis synth` command.
#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub task: PathBuf,
    pub stack_name: String,
    pub region: Option<String>,
    pub account: Option<String>,
    pub id: String,
    pub actions: Vec<FaultActionKind>,
    pub log_group_arn: Option<String>,
    pub agent_role_arn: Option<String>,
    pub config: Option<PathBuf>,
    pub native_sidecar: bool,
    pub sidecar_image: Option<String>,
}

/// Build the template described by `opts`.
pub fn run(opts: &SynthOptions) -> Result<Template> {
    let mut stack = Stack::new(&opts.stack_name);
    stack.region = opts.region.clone();
    stack.account = opts.account.clone();

    let mut task = load_task(&opts.task)?;
    let mut config = load_config(opts.config.as_deref())?;
    if opts.native_sidecar {
        config.sidecar.runtime = SidecarRuntime::Native;
    }
    if let Some(image) = &opts.sidecar_image {
        config.sidecar.image = image.clone();
    }

    let mut props = FaultInjectionProps::new().with_config(config);
    if !opts.actions.is_empty() {
        props = props.with_fault_actions(opts.actions.iter().copied().collect::<FaultActionSet>());
    }
    if let Some(arn) = &opts.log_group_arn {
        let log_group = LogGroup::from_arn(logical_id(&[&opts.id, "SSMAgentLogs"]), arn)
            .context("--log-group-arn")?;
        props = props.with_log_group(log_group);
    }
    if let Some(arn) = &opts.agent_role_arn {
        let role = Role::from_arn(logical_id(&[&opts.id, "SSMRole"]), arn)
            .context("--agent-role-arn")?;
        props = props.with_agent_role(role);
    }

    let fis = FaultInjection::apply(&stack, &opts.id, &mut task, props)
        .with_context(|| format!("cannot enable fault injection on task {}", task.family()))?;
    tracing::info!(
        "Fault injection {} attached to {} ({} preconditions)",
        fis.fault_actions(),
        task.family(),
        fis.preconditions().len()
    );

    Ok(synthesize(&stack, &task, &fis)?)
}

fn load_task(path: &Path) -> Result<TaskDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading task definition {}", path.display()))?;
    let input: TaskDefinitionInput = serde_json::from_str(&content)
        .with_context(|| format!("parsing task definition {}", path.display()))?;
    Ok(TaskDefinition::from_input(input)?)
}

/// Load settings from `path`, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<FisConfig> {
    match path {
        Some(path) => FisConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FisConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_task(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("task.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    fn options(task: PathBuf) -> SynthOptions {
        SynthOptions {
            task,
            stack_name: "integ-ecs-fargate-task-fis".to_string(),
            region: Some("eu-west-1".to_string()),
            account: None,
            id: "FaultInjection".to_string(),
            actions: Vec::new(),
            log_group_arn: None,
            agent_role_arn: None,
            config: None,
            native_sidecar: false,
            sidecar_image: None,
        }
    }

    #[test]
    fn test_synth_default_request() {
        let dir = tempfile::tempdir().unwrap();
        let task = write_task(
            dir.path(),
            r#"{"family": "web", "networkMode": "awsvpc",
                "containers": [{"name": "web", "image": "amazon/amazon-ecs-sample", "ports": [80]}]}"#,
        );

        let template = run(&options(task)).unwrap();
        let doc = template.render();

        assert!(template.resource("FaultInjectionSSMRole").is_some());
        assert!(template.resource("FaultInjectionSSMAgentLogs").is_some());
        let task_def = &doc["Resources"]["webTaskDef"]["Properties"];
        assert_eq!(task_def["PidMode"], "task");
        assert_eq!(task_def["EnableFaultInjection"], true);
    }

    #[test]
    fn test_synth_bridge_network_fault_fails() {
        let dir = tempfile::tempdir().unwrap();
        let task = write_task(dir.path(), r#"{"family": "legacy", "networkMode": "bridge"}"#);
        let mut opts = options(task);
        opts.actions = vec![FaultActionKind::NetworkLatency];

        let err = run(&opts).unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("cannot enable fault injection on task legacy"));
        assert!(chain.contains("Please use awsvpc, host, or none network mode."));
    }

    #[test]
    fn test_synth_with_supplied_resources() {
        let dir = tempfile::tempdir().unwrap();
        let task = write_task(dir.path(), r#"{"family": "web"}"#);
        let mut opts = options(task);
        opts.actions = vec![FaultActionKind::CpuStress];
        opts.agent_role_arn = Some("arn:aws:iam::123456789012:role/fis-agent".to_string());
        opts.log_group_arn =
            Some("arn:aws:logs:eu-west-1:123456789012:log-group:/shared/fis:*".to_string());

        let template = run(&opts).unwrap();
        assert_eq!(template.resources_of_type("AWS::IAM::Role").count(), 2);
        assert_eq!(template.resources_of_type("AWS::Logs::LogGroup").count(), 0);
    }

    #[test]
    fn test_synth_native_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let task = write_task(dir.path(), r#"{"family": "web"}"#);
        let mut opts = options(task);
        opts.native_sidecar = true;
        opts.sidecar_image = Some("registry.example.com/fis-sidecar:1.0".to_string());

        let doc = run(&opts).unwrap().render();
        let sidecar = doc["Resources"]["webTaskDef"]["Properties"]["ContainerDefinitions"]
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["Name"] == "amazon-ssm-agent")
            .unwrap()
            .clone();

        assert_eq!(sidecar["Image"], "registry.example.com/fis-sidecar:1.0");
        assert_eq!(sidecar["Command"], serde_json::json!(["ecs-fis-sidecar"]));
        let names: Vec<&str> = sidecar["Environment"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["Name"].as_str())
            .collect();
        assert!(names.contains(&"ECS_FIS_SIDECAR_SETTINGS"));
    }

    #[test]
    fn test_synth_rejects_bad_role_arn() {
        let dir = tempfile::tempdir().unwrap();
        let task = write_task(dir.path(), r#"{"family": "web"}"#);
        let mut opts = options(task);
        opts.agent_role_arn = Some("fis-agent".to_string());

        let err = run(&opts).unwrap_err();
        assert!(format!("{err:#}").contains("--agent-role-arn"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fis.toml");
        std::fs::write(&path, "[logs]\nretention_days = 30\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.logs.retention_days, 30);
        assert_eq!(load_config(None).unwrap(), FisConfig::default());
    }
}
