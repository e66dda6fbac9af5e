//! Alert channel over the SNS query API.

use super::client::AwsClient;
use super::xml::first_tag;
use crate::alerts::AlertChannel;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

const API_VERSION: &str = "2010-03-31";
/// SNS rejects longer subjects
const MAX_SUBJECT_CHARS: usize = 100;

pub struct SnsAlertChannel {
    client: AwsClient,
}

impl SnsAlertChannel {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlertChannel for SnsAlertChannel {
    async fn publish(&self, topic: &str, message: &str, subject: Option<&str>) -> Result<()> {
        let subject: Option<String> = subject.map(|s| s.chars().take(MAX_SUBJECT_CHARS).collect());
        let mut params = vec![("TopicArn", topic), ("Message", message)];
        if let Some(s) = &subject {
            params.push(("Subject", s.as_str()));
        }

        let xml = self
            .client
            .query_call("sns", API_VERSION, "Publish", &params, false)
            .await?;
        info!(topic, message_id = ?first_tag(&xml, "MessageId"), "alert published");
        Ok(())
    }
}
