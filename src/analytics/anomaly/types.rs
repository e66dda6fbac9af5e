//! Anomaly Types
//!
//! 異常レコードの型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 異常種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    /// 未知の送信元IP
    NewIpAddress,
    /// 未使用だったサービス
    NewServiceUsage,
    /// 重要アクション
    SensitiveAction,
    /// 頻出外のAPI呼び出し
    NewApiCall,
    /// 通常外の時間帯
    UnusualTime,
    /// 1サービスへの網羅的な呼び出し
    ServiceSweep,
}

impl AnomalyType {
    /// 種別ごとの固定リスクスコア
    pub fn risk_score(&self) -> u8 {
        match self {
            AnomalyType::NewIpAddress => 60,
            AnomalyType::NewServiceUsage => 50,
            AnomalyType::SensitiveAction => 75,
            AnomalyType::NewApiCall => 40,
            AnomalyType::UnusualTime => 65,
            AnomalyType::ServiceSweep => 70,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::NewIpAddress => "new_ip_address",
            AnomalyType::NewServiceUsage => "new_service_usage",
            AnomalyType::SensitiveAction => "sensitive_action",
            AnomalyType::NewApiCall => "new_api_call",
            AnomalyType::UnusualTime => "unusual_time",
            AnomalyType::ServiceSweep => "service_sweep",
        }
    }
}

/// 異常レコード（追記のみ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: String,
    pub user_arn: String,
    /// 検知時刻
    pub timestamp: DateTime<Utc>,
    /// 元イベントの時刻
    pub event_time: DateTime<Utc>,
    pub anomaly_type: AnomalyType,
    pub risk_score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl Anomaly {
    pub fn builder(
        user_arn: impl Into<String>,
        anomaly_type: AnomalyType,
        event_time: DateTime<Utc>,
    ) -> AnomalyBuilder {
        AnomalyBuilder {
            user_arn: user_arn.into(),
            anomaly_type,
            event_time,
            service: None,
            source_ip: None,
            action: None,
            details: Value::Object(Default::default()),
        }
    }

    /// 重複判定キー `(種別, サービス, アクション, IP, イベント時刻)`
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.anomaly_type.as_str(),
            self.service.as_deref().unwrap_or("-"),
            self.action.as_deref().unwrap_or("-"),
            self.source_ip.as_deref().unwrap_or("-"),
            self.event_time.timestamp_millis()
        )
    }
}

/// [`Anomaly`] ビルダー
#[derive(Debug, Clone)]
pub struct AnomalyBuilder {
    user_arn: String,
    anomaly_type: AnomalyType,
    event_time: DateTime<Utc>,
    service: Option<String>,
    source_ip: Option<String>,
    action: Option<String>,
    details: Value,
}

impl AnomalyBuilder {
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn build(self) -> Anomaly {
        Anomaly {
            id: uuid::Uuid::new_v4().to_string(),
            user_arn: self.user_arn,
            timestamp: Utc::now(),
            event_time: self.event_time,
            risk_score: self.anomaly_type.risk_score(),
            anomaly_type: self.anomaly_type,
            service: self.service,
            source_ip: self.source_ip,
            action: self.action,
            details: self.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let anomaly = Anomaly::builder("alice", AnomalyType::NewIpAddress, Utc::now())
            .source_ip("198.51.100.7")
            .build();
        let value = serde_json::to_value(&anomaly).unwrap();

        assert_eq!(value["anomaly_type"], "new_ip_address");
        assert_eq!(value["risk_score"], 60);
        assert_eq!(value["source_ip"], "198.51.100.7");
        assert!(value.get("service").is_none());
    }

    #[test]
    fn test_fingerprint_ignores_id() {
        let at = Utc::now();
        let a = Anomaly::builder("alice", AnomalyType::NewServiceUsage, at).service("kms").build();
        let b = Anomaly::builder("alice", AnomalyType::NewServiceUsage, at).service("kms").build();
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_keeps_action() {
        let at = Utc::now();
        let terminate = Anomaly::builder("alice", AnomalyType::SensitiveAction, at)
            .service("ec2")
            .action("TerminateInstances")
            .build();
        let stop = Anomaly::builder("alice", AnomalyType::SensitiveAction, at)
            .service("ec2")
            .action("StopInstances")
            .build();
        assert_ne!(terminate.fingerprint(), stop.fingerprint());
    }
}
