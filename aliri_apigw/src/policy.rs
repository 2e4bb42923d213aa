//! IAM policy responses

use std::collections::BTreeMap;

use aliri_authorizer::{AccessDecision, Context};
use serde::{Deserialize, Serialize};

/// The IAM policy language version
pub const POLICY_VERSION: &str = "2012-10-17";

/// The action that invokes an API
pub const EXECUTE_API_INVOKE: &str = "execute-api:Invoke";

/// Conditions keyed by operator, then by condition key
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, String>>;

/// An authorizer response carrying an IAM policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IamPolicyResponse {
    /// The principal the policy applies to
    pub principal_id: String,

    /// The policy granted to the principal
    pub policy_document: PolicyDocument,

    /// Values passed through to the integration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: Context,
}

/// An IAM policy document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// The policy language version
    pub version: String,

    /// The policy statements
    pub statement: Vec<Statement>,
}

/// A single IAM policy statement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// The action governed by the statement
    pub action: String,

    /// Whether the action is allowed or denied
    pub effect: String,

    /// The resources the statement applies to
    pub resource: Vec<String>,

    /// The conditions under which the statement applies
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlock,
}

impl From<&AccessDecision> for Statement {
    fn from(decision: &AccessDecision) -> Self {
        let mut condition = ConditionBlock::new();
        for c in decision.conditions() {
            condition
                .entry(c.operator().as_str().to_owned())
                .or_default()
                .insert(c.key().to_owned(), c.value());
        }

        Self {
            action: EXECUTE_API_INVOKE.to_owned(),
            effect: decision.effect().as_str().to_owned(),
            resource: vec![decision.resource().to_owned()],
            condition,
        }
    }
}

impl From<&AccessDecision> for IamPolicyResponse {
    fn from(decision: &AccessDecision) -> Self {
        Self {
            principal_id: decision.principal_id().to_owned(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_owned(),
                statement: vec![Statement::from(decision)],
            },
            context: decision.context().clone(),
        }
    }
}

impl From<AccessDecision> for IamPolicyResponse {
    #[inline]
    fn from(decision: AccessDecision) -> Self {
        Self::from(&decision)
    }
}

#[cfg(test)]
mod tests {
    use aliri_authorizer::{ClaimSet, DecisionAssembler, VerificationOutcome};
    use color_eyre::Result;
    use serde_json::{json, Value};

    use super::*;

    fn decision(claims: Value, context: Context) -> Result<AccessDecision> {
        let claims: ClaimSet = serde_json::from_value(claims)?;
        let outcome = VerificationOutcome::Verified {
            principal: "00u1abcd".to_owned(),
            context,
        };
        Ok(DecisionAssembler::new().assemble(outcome, &claims)?)
    }

    #[test]
    fn renders_policy_with_time_window() -> Result<()> {
        let context = [("email".to_owned(), json!("user@example.com"))]
            .into_iter()
            .collect();
        let decision = decision(json!({ "nbf": 1_699_999_000, "exp": 1_700_000_000 }), context)?;

        let response = IamPolicyResponse::from(decision);

        assert_eq!(
            serde_json::to_value(&response)?,
            json!({
                "principalId": "00u1abcd",
                "policyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Action": "execute-api:Invoke",
                        "Effect": "Allow",
                        "Resource": ["*"],
                        "Condition": {
                            "DateGreaterThan": { "aws:CurrentTime": "2023-11-14T21:56:40Z" },
                            "DateLessThan": { "aws:CurrentTime": "2023-11-14T22:13:20Z" },
                        },
                    }],
                },
                "context": { "email": "user@example.com" },
            })
        );

        Ok(())
    }

    #[test]
    fn omits_empty_condition_and_context() -> Result<()> {
        let decision = decision(json!({ "sub": "00u1abcd" }), Context::new())?;

        let response = serde_json::to_value(IamPolicyResponse::from(&decision))?;

        let statement = &response["policyDocument"]["Statement"][0];
        assert!(statement.get("Condition").is_none());
        assert!(response.get("context").is_none());

        Ok(())
    }

    #[test]
    fn rendering_is_deterministic() -> Result<()> {
        let decision = decision(json!({ "iat": 1_699_990_000, "exp": 1_700_000_000 }), Context::new())?;

        let first = serde_json::to_string(&IamPolicyResponse::from(&decision))?;
        let second = serde_json::to_string(&IamPolicyResponse::from(&decision))?;

        assert_eq!(first, second);

        Ok(())
    }
}
