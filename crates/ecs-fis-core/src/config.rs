//! Fault injection configuration
//!
//! Every constant the construct renders (sidecar image, env var names, log
//! retention, agent role trust) lives here so it can be overridden from a
//! TOML file. The defaults produce the stock SSM agent sidecar.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FisError, Result};
use crate::logs::RemovalPolicy;

/// Retention values accepted by CloudWatch Logs
pub const VALID_RETENTION_DAYS: [u32; 22] = [
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

/// Env var through which the native sidecar receives its settings as JSON
pub const SETTINGS_ENV_VAR: &str = "ECS_FIS_SIDECAR_SETTINGS";

/// What runs the agent lifecycle inside the sidecar container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidecarRuntime {
    /// Bash lifecycle script on the stock agent image
    #[default]
    Script,
    /// `ecs-fis-sidecar` supervisor; the image must ship it with the agent
    /// and the AWS CLI
    Native,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FisConfig {
    /// Sidecar container and lifecycle script settings
    pub sidecar: SidecarSettings,

    /// Log destination settings
    pub logs: LogSettings,

    /// Agent role settings
    pub agent_role: AgentRoleSettings,
}

impl FisConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sidecar image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.sidecar.image = image.into();
        self
    }

    /// Choose the sidecar runtime
    pub fn with_runtime(mut self, runtime: SidecarRuntime) -> Self {
        self.sidecar.runtime = runtime;
        self
    }

    /// Set the log retention
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.logs.retention_days = days;
        self
    }

    /// Check values that end up inside rendered shell or CloudFormation
    pub fn validate(&self) -> Result<()> {
        self.sidecar.validate()?;
        self.logs.validate()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Sidecar container settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarSettings {
    /// Container name inside the task
    pub container_name: String,

    /// Container image
    pub image: String,

    /// awslogs stream prefix
    pub stream_prefix: String,

    /// Env var carrying the agent role name
    pub role_env_var: String,

    /// Env var carrying the task metadata endpoint
    pub metadata_env_var: String,

    /// Agent binary name
    pub agent_binary: String,

    /// File where the agent persists its registration
    pub registration_file: String,

    /// Tag key marking activations created by the sidecar
    pub marker_tag: String,

    /// Package manager used to install prerequisites
    pub package_manager: String,

    /// Prerequisite packages
    pub packages: Vec<String>,

    /// Lifecycle runtime
    pub runtime: SidecarRuntime,

    /// Supervisor binary started by the native runtime
    pub supervisor_binary: String,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            container_name: "amazon-ssm-agent".to_string(),
            image: "public.ecr.aws/amazon-ssm-agent/amazon-ssm-agent:latest".to_string(),
            stream_prefix: "ssm-agent".to_string(),
            role_env_var: "MANAGED_INSTANCE_ROLE_NAME".to_string(),
            metadata_env_var: "ECS_CONTAINER_METADATA_URI_V4".to_string(),
            agent_binary: "amazon-ssm-agent".to_string(),
            registration_file: "/var/lib/amazon/ssm/registration".to_string(),
            marker_tag: "FAULT_INJECTION_SIDECAR".to_string(),
            package_manager: "dnf".to_string(),
            packages: vec![
                "jq".to_string(),
                "procps".to_string(),
                "awscli".to_string(),
            ],
            runtime: SidecarRuntime::Script,
            supervisor_binary: "ecs-fis-sidecar".to_string(),
        }
    }
}

impl SidecarSettings {
    /// Names and paths are spliced into the lifecycle script unquoted
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("role_env_var", &self.role_env_var),
            ("metadata_env_var", &self.metadata_env_var),
            ("marker_tag", &self.marker_tag),
        ] {
            if !is_shell_identifier(value) {
                return Err(FisError::InvalidConfig(format!(
                    "sidecar.{field} must be a shell identifier, got {value:?}"
                )));
            }
        }

        for (field, value) in [
            ("agent_binary", &self.agent_binary),
            ("registration_file", &self.registration_file),
            ("package_manager", &self.package_manager),
            ("container_name", &self.container_name),
            ("supervisor_binary", &self.supervisor_binary),
        ] {
            if !is_shell_word(value) {
                return Err(FisError::InvalidConfig(format!(
                    "sidecar.{field} contains characters that need quoting: {value:?}"
                )));
            }
        }

        if let Some(bad) = self.packages.iter().find(|p| !is_shell_word(p)) {
            return Err(FisError::InvalidConfig(format!(
                "sidecar.packages entry needs quoting: {bad:?}"
            )));
        }

        if self.image.trim().is_empty() {
            return Err(FisError::InvalidConfig("sidecar.image is empty".to_string()));
        }

        Ok(())
    }

    /// Settings as passed in [`SETTINGS_ENV_VAR`]
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate settings passed in [`SETTINGS_ENV_VAR`]
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}

fn is_shell_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_shell_word(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_' | '+'))
}

/// Log destination settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Leading path of generated group names
    pub namespace: String,

    /// Retention of generated groups
    pub retention_days: u32,

    /// Removal policy of generated groups
    pub removal_policy: RemovalPolicy,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            namespace: "aws/ecs/fis".to_string(),
            retention_days: 7, // one week
            removal_policy: RemovalPolicy::Destroy,
        }
    }
}

impl LogSettings {
    /// CloudWatch only accepts a fixed set of retention values
    pub fn validate(&self) -> Result<()> {
        if !VALID_RETENTION_DAYS.contains(&self.retention_days) {
            return Err(FisError::InvalidConfig(format!(
                "logs.retention_days {} is not a CloudWatch retention value",
                self.retention_days
            )));
        }
        if self.namespace.trim_matches('/').is_empty() {
            return Err(FisError::InvalidConfig("logs.namespace is empty".to_string()));
        }
        Ok(())
    }
}

/// Settings for the role minted for the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRoleSettings {
    /// Principal trusted to assume the role
    pub service_principal: String,

    /// Baseline AWS managed policy
    pub managed_policy: String,

    /// Role description
    pub description: String,
}

impl Default for AgentRoleSettings {
    fn default() -> Self {
        Self {
            service_principal: "ssm.amazonaws.com".to_string(),
            managed_policy: "AmazonSSMManagedInstanceCore".to_string(),
            description: "Role used by SSM agent for ECS Fault Injection".to_string(),
        }
    }
}
