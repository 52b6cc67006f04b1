//! Stack context and CloudFormation value tokens
//!
//! Resources reference each other through [`Token`]s, which render to the
//! intrinsic functions CloudFormation resolves at deploy time. Values that
//! are already known render as plain strings.

use serde::Serialize;

/// Deployment scope shared by every resource of one template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    /// Stack name, also used to derive resource names
    pub name: String,

    /// Target region; `None` defers to `AWS::Region`
    pub region: Option<String>,

    /// Target account; `None` defers to `AWS::AccountId`
    pub account: Option<String>,
}

impl Stack {
    /// Create an environment-agnostic stack
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            account: None,
        }
    }

    /// Pin the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Pin the account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// The region as a token
    pub fn region_token(&self) -> Token {
        match &self.region {
            Some(region) => Token::literal(region),
            None => Token::reference("AWS::Region"),
        }
    }

    /// The partition is never known at synth time
    pub fn partition_token(&self) -> Token {
        Token::reference("AWS::Partition")
    }

    /// `arn:<partition>:<service>:<region>:<account>:<resource>` scoped to this stack's region
    pub fn regional_arn(&self, service: &str, account: &str, resource: &str) -> Token {
        Token::join([
            Token::literal("arn:"),
            self.partition_token(),
            Token::literal(format!(":{service}:")),
            self.region_token(),
            Token::literal(format!(":{account}:{resource}")),
        ])
    }
}

/// Build a CloudFormation logical id from construct path segments
///
/// Non-alphanumeric characters are dropped, as logical ids only allow `[A-Za-z0-9]`.
pub fn logical_id(segments: &[&str]) -> String {
    segments
        .iter()
        .flat_map(|s| s.chars())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// A value that is either known now or resolved by CloudFormation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Token {
    /// Plain string
    Literal(String),

    /// `{"Ref": id}`
    Ref {
        /// Referenced logical id or pseudo parameter
        #[serde(rename = "Ref")]
        target: String,
    },

    /// `{"Fn::GetAtt": [id, attribute]}`
    GetAtt {
        /// Logical id and attribute name
        #[serde(rename = "Fn::GetAtt")]
        target: [String; 2],
    },

    /// `{"Fn::Join": ["", parts]}`
    Join {
        /// Delimiter and parts
        #[serde(rename = "Fn::Join")]
        parts: (String, Vec<Token>),
    },
}

impl Token {
    /// Known string value
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Reference to a resource or pseudo parameter
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Ref {
            target: target.into(),
        }
    }

    /// Attribute of a resource
    pub fn get_att(logical_id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::GetAtt {
            target: [logical_id.into(), attribute.into()],
        }
    }

    /// Concatenation; adjacent literals are merged and a lone literal collapses
    pub fn join(parts: impl IntoIterator<Item = Token>) -> Self {
        let mut merged: Vec<Token> = Vec::new();
        for part in parts {
            if let (Some(Token::Literal(prev)), Token::Literal(next)) = (merged.last_mut(), &part) {
                prev.push_str(next);
                continue;
            }
            merged.push(part);
        }

        if merged.len() == 1 && matches!(merged[0], Token::Literal(_)) {
            return merged.remove(0);
        }

        Self::Join {
            parts: (String::new(), merged),
        }
    }

    /// The string value when known at synth time
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::literal(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::Literal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_rendering() {
        assert_eq!(serde_json::to_value(Token::literal("x")).unwrap(), json!("x"));
        assert_eq!(
            serde_json::to_value(Token::reference("Role")).unwrap(),
            json!({"Ref": "Role"})
        );
        assert_eq!(
            serde_json::to_value(Token::get_att("Role", "Arn")).unwrap(),
            json!({"Fn::GetAtt": ["Role", "Arn"]})
        );
    }

    #[test]
    fn test_join_merges_literals() {
        let joined = Token::join([Token::literal("a"), Token::literal("b")]);
        assert_eq!(joined, Token::literal("ab"));

        let joined = Token::join([
            Token::literal("arn:"),
            Token::reference("AWS::Partition"),
            Token::literal(":ssm:"),
            Token::literal("eu-west-1"),
        ]);
        assert_eq!(
            serde_json::to_value(joined).unwrap(),
            json!({"Fn::Join": ["", ["arn:", {"Ref": "AWS::Partition"}, ":ssm:eu-west-1"]]})
        );
    }

    #[test]
    fn test_regional_arn_defers_unknown_region() {
        let stack = Stack::new("Test");
        let arn = stack.regional_arn("ssm", "*", "managed-instance/*");
        assert_eq!(
            serde_json::to_value(arn).unwrap(),
            json!({"Fn::Join": ["", [
                "arn:",
                {"Ref": "AWS::Partition"},
                ":ssm:",
                {"Ref": "AWS::Region"},
                ":*:managed-instance/*"
            ]]})
        );
    }

    #[test]
    fn test_logical_id_strips_separators() {
        assert_eq!(logical_id(&["Fault-Injection", "SSM Role"]), "FaultInjectionSSMRole");
    }
}
