//! Agent Lifecycle Script Assembler
//!
//! Renders the bash routine the sidecar container runs. The routine registers
//! the task as an SSM managed instance, runs the agent in the background and
//! on SIGTERM/SIGINT deletes the activation, deregisters the instance and
//! stops the agent.
//!
//! Every step before the agent is launched fails closed. The two cloud calls
//! in the teardown log and continue, so the agent always receives its signal.

use crate::config::SidecarSettings;
use crate::error::Result;

/// Shell variable holding the activation id
const ACTIVATION_ID: &str = "ACTIVATION_ID";
/// Shell variable holding the region derived from the availability zone
const REGION: &str = "ECS_TASK_REGION";
/// Shell variable holding the background agent PID
const AGENT_PID: &str = "SSM_AGENT_PID";

/// Build the lifecycle script for the given sidecar settings
pub fn assemble(settings: &SidecarSettings) -> Result<String> {
    settings.validate()?;

    let sections = [
        prelude(settings),
        teardown(settings),
        "trap term_handler SIGTERM SIGINT".to_string(),
        require_role(settings),
        idempotency_guard(settings),
        read_metadata(settings),
        activate(settings),
        register(settings),
        launch(settings),
    ];

    Ok(sections.join("\n"))
}

/// Container command running `script` under bash
pub fn container_command(script: impl Into<String>) -> Vec<String> {
    vec!["/bin/bash".to_string(), "-c".to_string(), script.into()]
}

fn prelude(settings: &SidecarSettings) -> String {
    let pm = &settings.package_manager;
    format!(
        "set -e\n\
         {pm} upgrade -y\n\
         {pm} install {packages} -y",
        packages = settings.packages.join(" ")
    )
}

fn teardown(settings: &SidecarSettings) -> String {
    let registration = &settings.registration_file;
    format!(
        r#"term_handler() {{
  echo "Deleting SSM activation ${ACTIVATION_ID}"
  if ! aws ssm delete-activation --activation-id "${ACTIVATION_ID}" --region "${REGION}"; then
    echo "SSM activation ${ACTIVATION_ID} failed to be deleted" 1>&2
  fi
  if MANAGED_INSTANCE_ID=$(jq -e -r .ManagedInstanceID {registration}); then
    echo "Deregistering SSM Managed Instance $MANAGED_INSTANCE_ID"
    if ! aws ssm deregister-managed-instance --instance-id "$MANAGED_INSTANCE_ID" --region "${REGION}"; then
      echo "SSM Managed Instance $MANAGED_INSTANCE_ID failed to be deregistered" 1>&2
    fi
  else
    echo "No managed instance registration found in {registration}" 1>&2
  fi
  if [[ -n "${AGENT_PID}" ]]; then
    kill -SIGTERM "${AGENT_PID}" || true
    wait "${AGENT_PID}" || true
  fi
  exit 0
}}"#
    )
}

fn require_role(settings: &SidecarSettings) -> String {
    let var = &settings.role_env_var;
    format!(
        r#"if [[ -z "${var}" ]]; then
  echo "Environment variable {var} not set, exiting" 1>&2
  exit 1
fi"#
    )
}

fn idempotency_guard(settings: &SidecarSettings) -> String {
    let agent = &settings.agent_binary;
    format!(
        r#"if pidof {agent} > /dev/null; then
  echo "SSM agent is already running, exiting" 1>&2
  exit 1
fi"#
    )
}

fn read_metadata(settings: &SidecarSettings) -> String {
    let uri = &settings.metadata_env_var;
    format!(
        r#"if [[ -z "${uri}" ]]; then
  echo "ECS Container Metadata not found, exiting" 1>&2
  exit 1
fi
echo "Found ECS Container Metadata, running activation with metadata"
if ! TASK_METADATA=$(curl -sf "${uri}/task"); then
  echo "Failed to read task metadata from ${uri}/task, exiting" 1>&2
  exit 1
fi
if ! ECS_TASK_AVAILABILITY_ZONE=$(echo "$TASK_METADATA" | jq -e -r '.AvailabilityZone'); then
  echo "Task metadata has no AvailabilityZone, exiting" 1>&2
  exit 1
fi
if ! ECS_TASK_ARN=$(echo "$TASK_METADATA" | jq -e -r '.TaskARN'); then
  echo "Task metadata has no TaskARN, exiting" 1>&2
  exit 1
fi
{REGION}=$(echo "$ECS_TASK_AVAILABILITY_ZONE" | sed 's/.$//')
echo "Found ECS Task ARN: $ECS_TASK_ARN, Availability Zone: $ECS_TASK_AVAILABILITY_ZONE, Region: ${REGION}""#
    )
}

fn activate(settings: &SidecarSettings) -> String {
    let role = &settings.role_env_var;
    let marker = &settings.marker_tag;
    format!(
        r#"if ! CREATE_ACTIVATION_OUTPUT=$(aws ssm create-activation --iam-role "${role}" --tags Key=ECS_TASK_AVAILABILITY_ZONE,Value="$ECS_TASK_AVAILABILITY_ZONE" Key=ECS_TASK_ARN,Value="$ECS_TASK_ARN" Key={marker},Value=true --region "${REGION}"); then
  echo "Failed to create SSM activation, exiting" 1>&2
  exit 1
fi
if ! ACTIVATION_CODE=$(echo "$CREATE_ACTIVATION_OUTPUT" | jq -e -r .ActivationCode); then
  echo "SSM activation has no ActivationCode, exiting" 1>&2
  exit 1
fi
if ! {ACTIVATION_ID}=$(echo "$CREATE_ACTIVATION_OUTPUT" | jq -e -r .ActivationId); then
  echo "SSM activation has no ActivationId, exiting" 1>&2
  exit 1
fi"#
    )
}

fn register(settings: &SidecarSettings) -> String {
    let agent = &settings.agent_binary;
    format!(
        r#"if ! {agent} -register -code "$ACTIVATION_CODE" -id "${ACTIVATION_ID}" -region "${REGION}"; then
  echo "Failed to register with AWS Systems Manager (SSM), exiting" 1>&2
  exit 1
fi"#
    )
}

fn launch(settings: &SidecarSettings) -> String {
    let agent = &settings.agent_binary;
    format!(
        "{agent} &\n\
         {AGENT_PID}=$!\n\
         wait \"${AGENT_PID}\""
    )
}
