//! CloudFormation template assembly

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{FisError, Result};

/// A CloudFormation template under construction
///
/// Resources are keyed by logical id; ids are unique within a template.
#[derive(Debug, Clone, Default)]
pub struct Template {
    description: Option<String>,
    resources: BTreeMap<String, Value>,
}

impl Template {
    /// Empty template
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the template description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add one resource
    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Value) -> Result<()> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(FisError::DuplicateResource(logical_id));
        }
        self.resources.insert(logical_id, resource);
        Ok(())
    }

    /// Add several resources, stopping at the first duplicate
    pub fn extend(&mut self, resources: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        for (logical_id, resource) in resources {
            self.add_resource(logical_id, resource)?;
        }
        Ok(())
    }

    /// Look up a resource
    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.resources.get(logical_id)
    }

    /// Logical ids of every resource of a CloudFormation type
    pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r["Type"] == resource_type)
            .map(|(id, _)| id.as_str())
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when no resource was added
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The template document
    pub fn render(&self) -> Value {
        let mut doc = json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Resources": self.resources,
        });
        if let Some(description) = &self.description {
            doc["Description"] = json!(description);
        }
        doc
    }

    /// The template document as indented JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.render())?)
    }
}
