//! Identity policies and the unused-permission diff.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// A managed policy attached to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedPolicy {
    pub policy_name: String,
    pub policy_arn: String,
}

/// Identity policy service. Documents are returned already URL-decoded.
#[async_trait]
pub trait IdentityPolicyApi: Send + Sync {
    async fn list_user_policies(&self, user_name: &str) -> Result<Vec<String>>;

    async fn get_user_policy(&self, user_name: &str, policy_name: &str) -> Result<String>;

    async fn list_attached_user_policies(&self, user_name: &str) -> Result<Vec<AttachedPolicy>>;

    /// Default version id of a managed policy
    async fn get_policy(&self, policy_arn: &str) -> Result<String>;

    async fn get_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<String>;
}

/// Allowed actions across the user's inline and attached managed policies
pub async fn collect_allowed_actions(api: &dyn IdentityPolicyApi, user_name: &str) -> Result<BTreeSet<String>> {
    let mut allowed = BTreeSet::new();

    for policy_name in api.list_user_policies(user_name).await? {
        let document = api.get_user_policy(user_name, &policy_name).await?;
        allowed.extend(parse_document(&document, &policy_name));
    }

    for attached in api.list_attached_user_policies(user_name).await? {
        let version = api.get_policy(&attached.policy_arn).await?;
        let document = api
            .get_policy_version(&attached.policy_arn, &version)
            .await?;
        allowed.extend(parse_document(&document, &attached.policy_name));
    }

    debug!(user_name, allowed = allowed.len(), "collected allowed actions");
    Ok(allowed)
}

fn parse_document(document: &str, policy_name: &str) -> BTreeSet<String> {
    match serde_json::from_str::<Value>(document) {
        Ok(value) => allowed_actions(&value),
        Err(e) => {
            warn!(policy = policy_name, error = %e, "skipping unparseable policy document");
            BTreeSet::new()
        }
    }
}

/// Actions granted by `Allow` statements; `Deny` statements are skipped
pub fn allowed_actions(document: &Value) -> BTreeSet<String> {
    let statements = match document.get("Statement") {
        Some(Value::Array(list)) => list.iter().collect::<Vec<_>>(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };

    let mut actions = BTreeSet::new();
    for statement in statements {
        let effect = statement.get("Effect").and_then(Value::as_str).unwrap_or("Allow");
        if effect.eq_ignore_ascii_case("Deny") {
            continue;
        }
        match statement.get("Action") {
            Some(Value::String(action)) => {
                actions.insert(action.clone());
            }
            Some(Value::Array(list)) => {
                actions.extend(list.iter().filter_map(Value::as_str).map(String::from));
            }
            _ => {}
        }
    }
    actions
}

/// Allowed but never observed
pub fn unused_permissions(allowed: &BTreeSet<String>, required: &BTreeSet<String>) -> BTreeSet<String> {
    allowed.difference(required).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allowed_actions_shapes() {
        let doc = json!({
            "Version": "2012-10-17",
            "Statement": [
                {"Effect": "Allow", "Action": "s3:GetObject", "Resource": "*"},
                {"Effect": "Allow", "Action": ["s3:PutObject", "iam:*"], "Resource": "*"},
                {"Effect": "Deny", "Action": "iam:DeleteUser", "Resource": "*"}
            ]
        });
        let actions = allowed_actions(&doc);
        assert_eq!(
            actions.into_iter().collect::<Vec<_>>(),
            vec!["iam:*", "s3:GetObject", "s3:PutObject"]
        );
    }

    #[test]
    fn test_single_statement_object() {
        let doc = json!({"Statement": {"Effect": "Allow", "Action": "kms:Decrypt"}});
        assert!(allowed_actions(&doc).contains("kms:Decrypt"));
    }

    #[test]
    fn test_unused_is_set_difference() {
        let allowed: BTreeSet<String> = ["s3:GetObject", "s3:PutObject", "iam:*"]
            .into_iter()
            .map(String::from)
            .collect();
        let required: BTreeSet<String> = ["s3:GetObject", "ec2:RunInstances"]
            .into_iter()
            .map(String::from)
            .collect();
        let unused = unused_permissions(&allowed, &required);
        assert_eq!(unused.len(), 2);
        assert!(unused.contains("iam:*"));
    }
}
