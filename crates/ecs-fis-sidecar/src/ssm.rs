//! SSM hybrid activation lifecycle
//!
//! [`ManagedInstanceApi`] is the seam between the supervisor and AWS. The
//! production implementation shells out to the `aws` CLI already present in
//! the agent image, so credentials come from the task role exactly as they
//! do for the agent itself.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

use crate::error::{Result, SidecarError};
use crate::metadata::TaskMetadata;

/// A hybrid activation the agent registers with
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Activation {
    /// Activation id, needed to delete it
    pub activation_id: String,
    /// One-time registration code
    pub activation_code: String,
}

/// Tag attached to the activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationTag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

impl ActivationTag {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    fn to_cli_arg(&self) -> String {
        format!("Key={},Value={}", self.key, self.value)
    }
}

/// Tags identifying the task behind an activation
pub fn activation_tags(metadata: &TaskMetadata, marker_tag: &str) -> Vec<ActivationTag> {
    vec![
        ActivationTag::new("ECS_TASK_AVAILABILITY_ZONE", &metadata.availability_zone),
        ActivationTag::new("ECS_TASK_ARN", &metadata.task_arn),
        ActivationTag::new(marker_tag, "true"),
    ]
}

/// Calls the supervisor makes against SSM
#[async_trait]
pub trait ManagedInstanceApi: Send + Sync {
    /// Create an activation for `role`
    async fn create_activation(
        &self,
        role: &str,
        tags: &[ActivationTag],
        region: &str,
    ) -> Result<Activation>;

    /// Delete an activation
    async fn delete_activation(&self, activation_id: &str, region: &str) -> Result<()>;

    /// Deregister a managed instance
    async fn deregister_managed_instance(&self, instance_id: &str, region: &str) -> Result<()>;
}

/// Output of one CLI invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status was zero
    pub success: bool,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
}

/// [`ManagedInstanceApi`] backed by the `aws` CLI
#[derive(Debug, Clone)]
pub struct AwsCli {
    program: String,
    leading_args: Vec<String>,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsCli {
    /// Use `aws` from `PATH`
    pub fn new() -> Self {
        Self::with_command("aws", Vec::<String>::new())
    }

    /// Use another program; `leading_args` precede every `ssm ...` invocation
    pub fn with_command<I, S>(program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    async fn ssm(&self, subcommand: &str, args: Vec<String>) -> Result<CommandOutput> {
        let mut argv = vec!["ssm".to_string(), subcommand.to_string()];
        argv.extend(args);

        let output = self.run(&argv).await?;
        if !output.success {
            return Err(SidecarError::CommandFailed {
                command: format!("aws ssm {subcommand}"),
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl ManagedInstanceApi for AwsCli {
    async fn create_activation(
        &self,
        role: &str,
        tags: &[ActivationTag],
        region: &str,
    ) -> Result<Activation> {
        let mut args = vec!["--iam-role".to_string(), role.to_string(), "--tags".to_string()];
        args.extend(tags.iter().map(ActivationTag::to_cli_arg));
        args.extend(["--region".to_string(), region.to_string()]);

        let output = self.ssm("create-activation", args).await?;
        serde_json::from_str(&output.stdout).map_err(|source| SidecarError::UnexpectedOutput {
            command: "aws ssm create-activation".to_string(),
            source,
        })
    }

    async fn delete_activation(&self, activation_id: &str, region: &str) -> Result<()> {
        self.ssm(
            "delete-activation",
            vec![
                "--activation-id".to_string(),
                activation_id.to_string(),
                "--region".to_string(),
                region.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn deregister_managed_instance(&self, instance_id: &str, region: &str) -> Result<()> {
        self.ssm(
            "deregister-managed-instance",
            vec![
                "--instance-id".to_string(),
                instance_id.to_string(),
                "--region".to_string(),
                region.to_string(),
            ],
        )
        .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct Registration {
    #[serde(rename = "ManagedInstanceID")]
    managed_instance_id: String,
}

/// Managed instance id the agent persisted after registering
pub fn read_managed_instance_id(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let fail = |reason: String| SidecarError::RegistrationFile {
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let registration: Registration =
        serde_json::from_str(&content).map_err(|e| fail(e.to_string()))?;
    if registration.managed_instance_id.is_empty() {
        return Err(fail("empty ManagedInstanceID".to_string()));
    }
    Ok(registration.managed_instance_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> TaskMetadata {
        TaskMetadata {
            availability_zone: "us-east-1a".to_string(),
            task_arn: "arn:aws:ecs:us-east-1:123456789012:task/default/abc".to_string(),
        }
    }

    /// `sh -c <script>` stands in for the CLI; the ssm arguments land in `$0..$n`
    fn fake_cli(script: &str) -> AwsCli {
        AwsCli::with_command("sh", ["-c", script])
    }

    #[test]
    fn test_activation_tags() {
        let tags = activation_tags(&metadata(), "FAULT_INJECTION_SIDECAR");
        let args: Vec<String> = tags.iter().map(ActivationTag::to_cli_arg).collect();
        assert_eq!(
            args,
            vec![
                "Key=ECS_TASK_AVAILABILITY_ZONE,Value=us-east-1a",
                "Key=ECS_TASK_ARN,Value=arn:aws:ecs:us-east-1:123456789012:task/default/abc",
                "Key=FAULT_INJECTION_SIDECAR,Value=true",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_activation_parses_output() {
        let cli = fake_cli(r#"echo '{"ActivationId": "act-1", "ActivationCode": "code-1"}'"#);
        let activation = cli
            .create_activation("fis-agent", &activation_tags(&metadata(), "FIS"), "us-east-1")
            .await
            .unwrap();

        assert_eq!(activation.activation_id, "act-1");
        assert_eq!(activation.activation_code, "code-1");
    }

    #[tokio::test]
    async fn test_create_activation_passes_arguments() {
        // $0 is "ssm", $1 the subcommand
        let cli = fake_cli(
            r#"[ "$1" = create-activation ] && [ "$3" = fis-agent ] && [ "$9" = us-east-1 ] \
               && echo '{"ActivationId": "a", "ActivationCode": "c"}'"#,
        );
        let result = cli
            .create_activation("fis-agent", &activation_tags(&metadata(), "FIS"), "us-east-1")
            .await;
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        let cli = fake_cli("echo 'AccessDenied' >&2; exit 254");
        let err = cli.delete_activation("act-1", "us-east-1").await.unwrap_err();

        match err {
            SidecarError::CommandFailed { command, code, stderr } => {
                assert_eq!(command, "aws ssm delete-activation");
                assert_eq!(code, Some(254));
                assert_eq!(stderr, "AccessDenied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_activation_output() {
        let cli = fake_cli("echo not-json");
        let err = cli
            .create_activation("fis-agent", &[], "us-east-1")
            .await
            .unwrap_err();
        assert!(matches!(err, SidecarError::UnexpectedOutput { .. }));
    }

    #[test]
    fn test_read_managed_instance_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registration");
        std::fs::write(
            &path,
            r#"{"ManagedInstanceID":"mi-0123456789abcdef0","Region":"us-east-1"}"#,
        )
        .unwrap();

        assert_eq!(read_managed_instance_id(&path).unwrap(), "mi-0123456789abcdef0");
    }

    #[test]
    fn test_read_missing_registration() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_managed_instance_id(dir.path().join("registration")).unwrap_err();
        assert!(matches!(err, SidecarError::RegistrationFile { .. }));
    }
}
