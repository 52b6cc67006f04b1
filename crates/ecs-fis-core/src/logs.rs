//! Log destination for the agent sidecar

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::arn::Arn;
use crate::config::LogSettings;
use crate::error::Result;
use crate::stack::{Stack, Token};
use crate::task::LogDriver;

/// What happens to an owned log group when the stack is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// Delete with the stack
    #[default]
    Destroy,
    /// Keep after stack deletion
    Retain,
}

impl RemovalPolicy {
    fn deletion_policy(&self) -> &'static str {
        match self {
            Self::Destroy => "Delete",
            Self::Retain => "Retain",
        }
    }
}

#[derive(Debug, Clone)]
enum LogGroupSource {
    Owned {
        name: String,
        retention_days: u32,
        removal: RemovalPolicy,
    },
    Imported {
        arn: Arn,
        name: String,
    },
}

/// CloudWatch log group receiving the sidecar's output
#[derive(Debug, Clone)]
pub struct LogGroup {
    logical_id: String,
    source: LogGroupSource,
}

impl LogGroup {
    /// A new group named `/<namespace>/<stack>/<construct id>`
    pub fn for_construct(
        logical_id: impl Into<String>,
        stack: &Stack,
        construct_id: &str,
        settings: &LogSettings,
    ) -> Self {
        let namespace = settings.namespace.trim_matches('/');
        Self {
            logical_id: logical_id.into(),
            source: LogGroupSource::Owned {
                name: format!("/{}/{}/{}", namespace, stack.name, construct_id),
                retention_days: settings.retention_days,
                removal: settings.removal_policy,
            },
        }
    }

    /// Import an existing group by ARN
    pub fn from_arn(logical_id: impl Into<String>, arn: &str) -> Result<Self> {
        let arn = arn.parse::<Arn>()?.expect_resource("logs", "log-group")?;
        let name = arn
            .resource
            .trim_start_matches("log-group:")
            .trim_end_matches(":*")
            .to_string();

        Ok(Self {
            logical_id: logical_id.into(),
            source: LogGroupSource::Imported { arn, name },
        })
    }

    /// Logical id in the template
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// True when the group is owned by someone else
    pub fn is_imported(&self) -> bool {
        matches!(self.source, LogGroupSource::Imported { .. })
    }

    /// Group name as a token
    pub fn name(&self) -> Token {
        match &self.source {
            LogGroupSource::Owned { .. } => Token::reference(&self.logical_id),
            LogGroupSource::Imported { name, .. } => Token::literal(name),
        }
    }

    /// Group name as a plain string
    pub fn declared_name(&self) -> &str {
        match &self.source {
            LogGroupSource::Owned { name, .. } | LogGroupSource::Imported { name, .. } => name,
        }
    }

    /// Retention of an owned group
    pub fn retention_days(&self) -> Option<u32> {
        match &self.source {
            LogGroupSource::Owned { retention_days, .. } => Some(*retention_days),
            LogGroupSource::Imported { .. } => None,
        }
    }

    /// Group ARN as a token, in the `log-group:<name>:*` form that covers
    /// the group's streams
    pub fn arn(&self) -> Token {
        match &self.source {
            LogGroupSource::Owned { .. } => Token::get_att(&self.logical_id, "Arn"),
            LogGroupSource::Imported { arn, name } => Token::literal(format!(
                "arn:{}:logs:{}:{}:log-group:{}:*",
                arn.partition, arn.region, arn.account, name
            )),
        }
    }

    /// Region of an imported group
    pub fn region(&self) -> Option<&str> {
        match &self.source {
            LogGroupSource::Imported { arn, .. } if !arn.region.is_empty() => Some(&arn.region),
            _ => None,
        }
    }

    /// awslogs binding writing to this group
    pub fn driver(&self, stream_prefix: impl Into<String>) -> LogDriver {
        let driver = LogDriver::new(self.name(), stream_prefix).with_group_arn(self.arn());
        match self.region() {
            Some(region) => driver.with_region(region),
            None => driver,
        }
    }

    /// `AWS::Logs::LogGroup` resource for an owned group
    pub fn to_resource(&self) -> Option<(String, Value)> {
        let LogGroupSource::Owned {
            name,
            retention_days,
            removal,
        } = &self.source
        else {
            return None;
        };

        Some((
            self.logical_id.clone(),
            json!({
                "Type": "AWS::Logs::LogGroup",
                "Properties": {
                    "LogGroupName": name,
                    "RetentionInDays": retention_days,
                },
                "UpdateReplacePolicy": removal.deletion_policy(),
                "DeletionPolicy": removal.deletion_policy(),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_group_name_and_retention() {
        let stack = Stack::new("integ-ecs-fargate-task-fis");
        let group = LogGroup::for_construct("Logs", &stack, "TestConstruct", &LogSettings::default());

        assert_eq!(group.declared_name(), "/aws/ecs/fis/integ-ecs-fargate-task-fis/TestConstruct");

        let (_, resource) = group.to_resource().unwrap();
        assert_eq!(resource["Properties"]["RetentionInDays"], 7);
        assert_eq!(resource["DeletionPolicy"], "Delete");
        assert_eq!(resource["UpdateReplacePolicy"], "Delete");
    }

    #[test]
    fn test_imported_group() {
        let group = LogGroup::from_arn(
            "Logs",
            "arn:aws:logs:eu-west-1:123456789012:log-group:/shared/agents:*",
        )
        .unwrap();

        assert!(group.is_imported());
        assert!(group.to_resource().is_none());
        assert_eq!(group.name(), Token::literal("/shared/agents"));
        assert_eq!(
            group.arn(),
            Token::literal("arn:aws:logs:eu-west-1:123456789012:log-group:/shared/agents:*")
        );
    }

    #[test]
    fn test_imported_group_driver_keeps_its_region() {
        let group = LogGroup::from_arn(
            "Logs",
            "arn:aws:logs:eu-west-1:210987654321:log-group:/shared/agents",
        )
        .unwrap();
        let driver = group.driver("ssm-agent");

        assert_eq!(group.region(), Some("eu-west-1"));
        assert_eq!(driver.group, Token::literal("/shared/agents"));
        assert_eq!(driver.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            driver.group_arn,
            Some(Token::literal(
                "arn:aws:logs:eu-west-1:210987654321:log-group:/shared/agents:*"
            ))
        );
    }

    #[test]
    fn test_owned_group_driver_uses_stack_region() {
        let stack = Stack::new("TestStack");
        let group = LogGroup::for_construct("Logs", &stack, "Fis", &LogSettings::default());
        let driver = group.driver("ssm-agent");

        assert_eq!(group.region(), None);
        assert_eq!(driver.region, None);
        assert_eq!(driver.group, Token::reference("Logs"));
        assert_eq!(driver.group_arn, Some(Token::get_att("Logs", "Arn")));
    }

    #[test]
    fn test_import_rejects_other_resources() {
        assert!(LogGroup::from_arn("Logs", "arn:aws:iam::123456789012:role/agent").is_err());
    }
}
