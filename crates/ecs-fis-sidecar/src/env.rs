//! Environment the sidecar is started with

use ecs_fis_core::config::SidecarSettings;

use crate::error::{Result, SidecarError};

/// Values read from the container environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarEnv {
    /// Name of the role SSM assumes for the agent
    pub role_name: String,

    /// Task metadata endpoint; checked after the idempotency guard
    pub metadata_uri: Option<String>,
}

impl SidecarEnv {
    /// Read from the process environment
    pub fn from_env(settings: &SidecarSettings) -> Result<Self> {
        Self::from_lookup(settings, |key| std::env::var(key).ok())
    }

    /// Read through `lookup`; empty values count as unset
    pub fn from_lookup<F>(settings: &SidecarSettings, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let role_name = non_empty(settings.role_env_var.as_str())
            .ok_or_else(|| SidecarError::MissingEnv(settings.role_env_var.clone()))?;

        Ok(Self {
            role_name,
            metadata_uri: non_empty(settings.metadata_env_var.as_str()),
        })
    }
}
