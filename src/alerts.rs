//! アラート通知

use crate::analytics::Anomaly;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// アラートレベル
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// 警告
    Warning,
    /// 致命的
    Critical,
}

impl AlertLevel {
    /// 最大リスクスコアからレベルを決定
    pub fn from_score(score: u8) -> Self {
        if score >= 75 {
            Self::Critical
        } else {
            Self::Warning
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// 高リスク異常の通知内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub level: AlertLevel,
    pub generated_at: DateTime<Utc>,
    pub threshold: u8,
    pub anomaly_count: usize,
    pub high_risk: Vec<Anomaly>,
}

impl SecurityAlert {
    /// 閾値以上の異常が無ければ `None`
    pub fn from_anomalies(anomalies: &[Anomaly], threshold: u8) -> Option<Self> {
        let high_risk: Vec<Anomaly> = anomalies
            .iter()
            .filter(|a| a.risk_score >= threshold)
            .cloned()
            .collect();
        let max_score = high_risk.iter().map(|a| a.risk_score).max()?;

        Some(Self {
            level: AlertLevel::from_score(max_score),
            generated_at: Utc::now(),
            threshold,
            anomaly_count: anomalies.len(),
            high_risk,
        })
    }

    pub fn subject(&self) -> String {
        format!(
            "[{}] {} high-risk security anomalies detected",
            self.level.as_str().to_uppercase(),
            self.high_risk.len()
        )
    }

    pub fn body(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// 通知チャネル（ベストエフォート）
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn publish(&self, topic: &str, message: &str, subject: Option<&str>) -> Result<()>;
}

/// ログ出力のみのチャネル
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn publish(&self, topic: &str, message: &str, subject: Option<&str>) -> Result<()> {
        warn!(topic, subject = subject.unwrap_or_default(), %message, "security alert");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnomalyType;

    #[test]
    fn test_alert_only_above_threshold() {
        let now = Utc::now();
        let low = Anomaly::builder("alice", AnomalyType::NewApiCall, now).build();
        assert!(SecurityAlert::from_anomalies(&[low.clone()], 70).is_none());

        let high = Anomaly::builder("alice", AnomalyType::SensitiveAction, now)
            .action("DeleteUser")
            .build();
        let alert = SecurityAlert::from_anomalies(&[low, high], 70).unwrap();
        assert_eq!(alert.high_risk.len(), 1);
        assert_eq!(alert.level, AlertLevel::Critical);
        assert!(alert.subject().starts_with("[CRITICAL]"));
    }

    #[test]
    fn test_log_channel_accepts_alert() {
        let high = Anomaly::builder("bob", AnomalyType::ServiceSweep, Utc::now())
            .service("iam")
            .build();
        let alert = SecurityAlert::from_anomalies(&[high], 70).unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);

        let body = alert.body().unwrap();
        let sent = tokio_test::block_on(LogAlertChannel.publish("security-alerts", &body, Some(&alert.subject())));
        assert!(sent.is_ok());
    }
}
