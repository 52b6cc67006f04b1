//! ECS task metadata endpoint (v4)
//!
//! Only the fields the activation needs are decoded: the availability zone,
//! which also gives the region, and the task ARN.

use serde::Deserialize;

use crate::error::{Result, SidecarError};

/// Fields of `GET ${ECS_CONTAINER_METADATA_URI_V4}/task`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskMetadata {
    /// Zone the task runs in, e.g. `eu-west-1a`
    #[serde(rename = "AvailabilityZone")]
    pub availability_zone: String,

    /// Full task ARN
    #[serde(rename = "TaskARN")]
    pub task_arn: String,
}

impl TaskMetadata {
    /// Region the task runs in
    pub fn region(&self) -> Result<String> {
        region_from_availability_zone(&self.availability_zone)
    }
}

/// Drop the zone letter: `us-east-1a` becomes `us-east-1`
pub fn region_from_availability_zone(zone: &str) -> Result<String> {
    let mut chars = zone.chars();
    match chars.next_back() {
        Some(letter) if letter.is_ascii_lowercase() && !chars.as_str().is_empty() => {
            Ok(chars.as_str().to_string())
        }
        _ => Err(SidecarError::InvalidAvailabilityZone(zone.to_string())),
    }
}

/// Client for the task metadata endpoint
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_uri: String,
}

impl MetadataClient {
    /// Client for the endpoint at `base_uri`
    pub fn new(http: reqwest::Client, base_uri: impl Into<String>) -> Self {
        Self {
            http,
            base_uri: base_uri.into(),
        }
    }

    /// Fetch the task document
    pub async fn fetch_task(&self) -> Result<TaskMetadata> {
        let url = format!("{}/task", self.base_uri.trim_end_matches('/'));
        tracing::debug!("Fetching task metadata from {}", url);

        let metadata = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<TaskMetadata>()
            .await?;
        Ok(metadata)
    }
}
