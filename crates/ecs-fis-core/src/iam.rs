//! IAM roles and policy statements
//!
//! A [`Role`] is either owned by the template (rendered as `AWS::IAM::Role`)
//! or imported by ARN. Both kinds accumulate inline statements, which render
//! as a separate `AWS::IAM::Policy` attached by role name.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::arn::Arn;
use crate::error::Result;
use crate::stack::{Stack, Token};

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    /// Grant
    Allow,
    /// Explicit denial
    Deny,
}

/// One IAM policy statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// Allow or deny
    pub effect: Effect,

    /// Action names such as `ssm:CreateActivation`
    #[serde(serialize_with = "one_or_many")]
    pub action: Vec<String>,

    /// Resource scope
    #[serde(serialize_with = "one_or_many")]
    pub resource: Vec<Token>,
}

impl PolicyStatement {
    /// An allow statement
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator<Item = Token>,
    {
        Self {
            effect: Effect::Allow,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().collect(),
        }
    }

    /// Whether the statement names an action
    pub fn has_action(&self, action: &str) -> bool {
        self.action.iter().any(|a| a == action)
    }
}

#[allow(clippy::ptr_arg)]
fn one_or_many<S, T>(items: &Vec<T>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    match items.as_slice() {
        [single] => single.serialize(serializer),
        many => many.serialize(serializer),
    }
}

/// Ordered, duplicate-free statement list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    /// Add a statement; returns `false` when an identical one is already present
    pub fn add_statement(&mut self, statement: PolicyStatement) -> bool {
        if self.statements.contains(&statement) {
            return false;
        }
        self.statements.push(statement);
        true
    }

    /// Statements in insertion order
    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// True when no statement was added
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// CloudFormation JSON form
    pub fn to_json(&self) -> Value {
        json!({
            "Version": "2012-10-17",
            "Statement": self.statements,
        })
    }
}

/// An AWS managed policy referenced by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPolicy {
    name: String,
}

impl ManagedPolicy {
    /// `arn:<partition>:iam::aws:policy/<name>`
    pub fn aws_managed(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Policy name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// ARN token
    pub fn arn(&self, stack: &Stack) -> Token {
        Token::join([
            Token::literal("arn:"),
            stack.partition_token(),
            Token::literal(format!(":iam::aws:policy/{}", self.name)),
        ])
    }
}

#[derive(Debug, Clone)]
enum RoleSource {
    Owned {
        assumed_by: String,
        description: Option<String>,
        managed_policies: Vec<ManagedPolicy>,
    },
    Imported {
        arn: Arn,
    },
}

/// An IAM role, owned by the template or imported
#[derive(Debug, Clone)]
pub struct Role {
    logical_id: String,
    source: RoleSource,
    policy: PolicyDocument,
}

impl Role {
    /// A new role trusted by a service principal (e.g. `ssm.amazonaws.com`)
    pub fn new(logical_id: impl Into<String>, service_principal: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            source: RoleSource::Owned {
                assumed_by: service_principal.into(),
                description: None,
                managed_policies: Vec::new(),
            },
            policy: PolicyDocument::default(),
        }
    }

    /// Import an existing role by ARN
    pub fn from_arn(logical_id: impl Into<String>, arn: &str) -> Result<Self> {
        let arn = arn.parse::<Arn>()?.expect_resource("iam", "role")?;
        Ok(Self {
            logical_id: logical_id.into(),
            source: RoleSource::Imported { arn },
            policy: PolicyDocument::default(),
        })
    }

    /// Set the description of an owned role
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        if let RoleSource::Owned {
            description: slot, ..
        } = &mut self.source
        {
            *slot = Some(description.into());
        }
        self
    }

    /// Attach a managed policy; imported roles are left untouched and `false` is returned
    pub fn add_managed_policy(&mut self, policy: ManagedPolicy) -> bool {
        match &mut self.source {
            RoleSource::Owned {
                managed_policies, ..
            } => {
                if managed_policies.contains(&policy) {
                    return false;
                }
                managed_policies.push(policy);
                true
            }
            RoleSource::Imported { arn } => {
                tracing::warn!("Not attaching {} to imported role {}", policy.name(), arn);
                false
            }
        }
    }

    /// Add an inline statement
    pub fn add_to_policy(&mut self, statement: PolicyStatement) -> bool {
        self.policy.add_statement(statement)
    }

    /// Logical id in the template
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// True when the role is owned by someone else
    pub fn is_imported(&self) -> bool {
        matches!(self.source, RoleSource::Imported { .. })
    }

    /// Role ARN
    pub fn arn(&self) -> Token {
        match &self.source {
            RoleSource::Owned { .. } => Token::get_att(&self.logical_id, "Arn"),
            RoleSource::Imported { arn } => Token::literal(arn.to_string()),
        }
    }

    /// Role name
    pub fn name(&self) -> Token {
        match &self.source {
            RoleSource::Owned { .. } => Token::reference(&self.logical_id),
            RoleSource::Imported { arn } => Token::literal(arn.resource_name()),
        }
    }

    /// Trusted service principal of an owned role
    pub fn assumed_by(&self) -> Option<&str> {
        match &self.source {
            RoleSource::Owned { assumed_by, .. } => Some(assumed_by),
            RoleSource::Imported { .. } => None,
        }
    }

    /// Description of an owned role
    pub fn description(&self) -> Option<&str> {
        match &self.source {
            RoleSource::Owned { description, .. } => description.as_deref(),
            RoleSource::Imported { .. } => None,
        }
    }

    /// Managed policies of an owned role
    pub fn managed_policies(&self) -> &[ManagedPolicy] {
        match &self.source {
            RoleSource::Owned {
                managed_policies, ..
            } => managed_policies,
            RoleSource::Imported { .. } => &[],
        }
    }

    /// Inline statements added so far
    pub fn statements(&self) -> &[PolicyStatement] {
        self.policy.statements()
    }

    /// Logical id of the inline policy resource
    pub fn policy_logical_id(&self) -> String {
        format!("{}DefaultPolicy", self.logical_id)
    }

    /// Resources for this role: the role itself when owned, plus its inline policy
    pub fn to_resources(&self, stack: &Stack) -> Vec<(String, Value)> {
        let mut resources = Vec::new();

        if let RoleSource::Owned {
            assumed_by,
            description,
            managed_policies,
        } = &self.source
        {
            let mut properties = json!({
                "AssumeRolePolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "sts:AssumeRole",
                        "Effect": "Allow",
                        "Principal": { "Service": assumed_by },
                    }],
                },
            });
            if let Some(description) = description {
                properties["Description"] = json!(description);
            }
            if !managed_policies.is_empty() {
                let arns: Vec<Token> = managed_policies.iter().map(|p| p.arn(stack)).collect();
                properties["ManagedPolicyArns"] = json!(arns);
            }
            resources.push((
                self.logical_id.clone(),
                json!({ "Type": "AWS::IAM::Role", "Properties": properties }),
            ));
        }

        if !self.policy.is_empty() {
            resources.push((
                self.policy_logical_id(),
                json!({
                    "Type": "AWS::IAM::Policy",
                    "Properties": {
                        "PolicyName": self.policy_logical_id(),
                        "PolicyDocument": self.policy.to_json(),
                        "Roles": [self.name()],
                    },
                }),
            ));
        }

        resources
    }
}
