//! ARN parsing for caller-supplied resources

use std::fmt;
use std::str::FromStr;

use crate::error::{FisError, Result};

/// A parsed Amazon Resource Name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    /// `aws`, `aws-cn`, `aws-us-gov`
    pub partition: String,
    /// Service namespace
    pub service: String,
    /// Empty for global services such as IAM
    pub region: String,
    /// Owning account
    pub account: String,
    /// Resource part, including its type prefix
    pub resource: String,
}

impl Arn {
    /// Resource name after the type prefix (`role/path/name` gives `name`)
    pub fn resource_name(&self) -> &str {
        let tail = self
            .resource
            .split_once(|c: char| c == '/' || c == ':')
            .map(|(_, rest)| rest)
            .unwrap_or(&self.resource);
        tail.rsplit('/').next().unwrap_or(tail)
    }

    /// Require a specific service and resource type
    pub fn expect_resource(self, service: &str, resource_type: &str) -> Result<Self> {
        let type_matches = self
            .resource
            .strip_prefix(resource_type)
            .is_some_and(|rest| rest.starts_with('/') || rest.starts_with(':'));

        if self.service != service || !type_matches {
            return Err(FisError::InvalidArn(format!(
                "{self} is not a {service} {resource_type}"
            )));
        }
        Ok(self)
    }
}

impl FromStr for Arn {
    type Err = FisError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(6, ':').collect();
        let [prefix, partition, service, region, account, resource] = parts[..] else {
            return Err(FisError::InvalidArn(s.to_string()));
        };

        if prefix != "arn" || partition.is_empty() || service.is_empty() || resource.is_empty() {
            return Err(FisError::InvalidArn(s.to_string()));
        }

        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_arn() {
        let arn: Arn = "arn:aws:iam::123456789012:role/service/fis-agent".parse().unwrap();
        assert_eq!(arn.service, "iam");
        assert_eq!(arn.region, "");
        assert_eq!(arn.resource_name(), "fis-agent");
        assert!(arn.expect_resource("iam", "role").is_ok());
    }

    #[test]
    fn test_parse_log_group_arn() {
        let arn: Arn = "arn:aws:logs:eu-west-1:123456789012:log-group:/ecs/app:*"
            .parse()
            .unwrap();
        assert_eq!(arn.resource, "log-group:/ecs/app:*");
        assert!(arn.expect_resource("logs", "log-group").is_ok());
    }

    #[test]
    fn test_malformed_arns_are_rejected() {
        for bad in ["", "role/x", "arn:aws:iam", "urn:aws:iam::1:role/x", "arn::iam::1:role/x"] {
            assert!(bad.parse::<Arn>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_wrong_resource_type_is_rejected() {
        let arn: Arn = "arn:aws:iam::123456789012:user/alice".parse().unwrap();
        assert!(arn.expect_resource("iam", "role").is_err());
    }
}
