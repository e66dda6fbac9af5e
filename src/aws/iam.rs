//! Identity policy client over the IAM query API.

use super::client::AwsClient;
use super::xml::{all_tags, first_tag};
use crate::analytics::policy::{AttachedPolicy, IdentityPolicyApi};
use crate::error::{Error, Result};
use async_trait::async_trait;

const API_VERSION: &str = "2010-05-08";

pub struct IamClient {
    client: AwsClient,
}

impl IamClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, params: &[(&str, &str)]) -> Result<String> {
        self.client.query_call("iam", API_VERSION, action, params, true).await
    }

    /// Follow `IsTruncated` / `Marker` until the listing is complete
    async fn paged(&self, action: &str, user_name: &str) -> Result<Vec<String>> {
        let mut pages = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut params = vec![("UserName", user_name)];
            if let Some(m) = &marker {
                params.push(("Marker", m.as_str()));
            }
            let xml = self.call(action, &params).await?;
            let truncated = first_tag(&xml, "IsTruncated").as_deref() == Some("true");
            marker = first_tag(&xml, "Marker");
            pages.push(xml);
            if !truncated || marker.is_none() {
                break;
            }
        }
        Ok(pages)
    }
}

/// Policy documents come back URL-encoded
fn decode_document(encoded: &str) -> Result<String> {
    urlencoding::decode(encoded)
        .map(|s| s.into_owned())
        .map_err(|e| Error::UpstreamFailed(format!("undecodable policy document: {}", e)))
}

#[async_trait]
impl IdentityPolicyApi for IamClient {
    async fn list_user_policies(&self, user_name: &str) -> Result<Vec<String>> {
        Ok(self
            .paged("ListUserPolicies", user_name)
            .await?
            .iter()
            .flat_map(|xml| all_tags(xml, "member"))
            .collect())
    }

    async fn get_user_policy(&self, user_name: &str, policy_name: &str) -> Result<String> {
        let xml = self
            .call(
                "GetUserPolicy",
                &[("UserName", user_name), ("PolicyName", policy_name)],
            )
            .await?;
        let encoded = first_tag(&xml, "PolicyDocument")
            .ok_or_else(|| Error::UpstreamFailed("GetUserPolicy returned no document".to_string()))?;
        decode_document(&encoded)
    }

    async fn list_attached_user_policies(&self, user_name: &str) -> Result<Vec<AttachedPolicy>> {
        Ok(self
            .paged("ListAttachedUserPolicies", user_name)
            .await?
            .iter()
            .flat_map(|xml| all_tags(xml, "member"))
            .filter_map(|member| {
                Some(AttachedPolicy {
                    policy_name: first_tag(&member, "PolicyName")?,
                    policy_arn: first_tag(&member, "PolicyArn")?,
                })
            })
            .collect())
    }

    async fn get_policy(&self, policy_arn: &str) -> Result<String> {
        let xml = self.call("GetPolicy", &[("PolicyArn", policy_arn)]).await?;
        first_tag(&xml, "DefaultVersionId")
            .ok_or_else(|| Error::UpstreamFailed(format!("no default version for {}", policy_arn)))
    }

    async fn get_policy_version(&self, policy_arn: &str, version_id: &str) -> Result<String> {
        let xml = self
            .call(
                "GetPolicyVersion",
                &[("PolicyArn", policy_arn), ("VersionId", version_id)],
            )
            .await?;
        let encoded = first_tag(&xml, "Document")
            .ok_or_else(|| Error::UpstreamFailed("GetPolicyVersion returned no document".to_string()))?;
        decode_document(&encoded)
    }
}
