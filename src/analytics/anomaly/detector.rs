//! Anomaly Detector Registry
//!
//! 検知器の共通インターフェースと固定レジストリ

use super::action::ActionDetector;
use super::ip::IpDetector;
use super::service::ServiceDetector;
use super::sweep::ServiceSweepDetector;
use super::time::TimeDetector;
use super::types::Anomaly;
use crate::analytics::events::Event;
use crate::analytics::profile::BehaviorProfile;
use std::collections::BTreeSet;
use tracing::debug;

/// 既定の重要アクション
pub const DEFAULT_SENSITIVE_ACTIONS: [&str; 10] = [
    "DeleteUser",
    "CreateUser",
    "CreateAccessKey",
    "PutRolePolicy",
    "DeleteDBInstance",
    "StopInstances",
    "TerminateInstances",
    "DeleteBucket",
    "UpdateUser",
    "DetachRolePolicy",
];

/// 重要アクション集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveActions(BTreeSet<String>);

impl Default for SensitiveActions {
    fn default() -> Self {
        Self(DEFAULT_SENSITIVE_ACTIONS.iter().map(|s| s.to_string()).collect())
    }
}

impl SensitiveActions {
    /// 設定値があれば置き換え
    pub fn from_override(actions: Option<&[String]>) -> Self {
        match actions {
            Some(list) if !list.is_empty() => Self(list.iter().cloned().collect()),
            _ => Self::default(),
        }
    }

    pub fn contains(&self, action: &str) -> bool {
        self.0.contains(action)
    }
}

/// 異常検知器
///
/// 1回の呼び出しが1スキャンに相当し、件数上限や「初回のみ」の判定は
/// 呼び出しごとにリセットされる。
pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, identity: &str, events: &[Event], profile: &BehaviorProfile) -> Vec<Anomaly>;
}

/// 検知器レジストリ
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn AnomalyDetector>>,
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// 5種の標準検知器
    pub fn standard(sensitive: SensitiveActions) -> Self {
        Self::empty()
            .register(IpDetector)
            .register(ServiceDetector)
            .register(ActionDetector::new(sensitive))
            .register(TimeDetector)
            .register(ServiceSweepDetector)
    }

    pub fn register(mut self, detector: impl AnomalyDetector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// 全検知器を実行（プロファイルが無ければ空）
    pub fn run(&self, identity: &str, events: &[Event], profile: Option<&BehaviorProfile>) -> Vec<Anomaly> {
        let Some(profile) = profile else {
            debug!(user_arn = identity, "no baseline profile, skipping detection");
            return Vec::new();
        };

        let mut ordered: Vec<Event> = events.to_vec();
        ordered.sort_by_key(|e| e.event_time);

        let mut anomalies = Vec::new();
        for detector in &self.detectors {
            let found = detector.detect(identity, &ordered, profile);
            debug!(
                user_arn = identity,
                detector = detector.name(),
                found = found.len(),
                "detector finished"
            );
            anomalies.extend(found);
        }
        anomalies
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::standard(SensitiveActions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_no_profile_yields_nothing() {
        let events = vec![Event::new(
            "alice",
            "TerminateInstances",
            "ec2.amazonaws.com",
            "203.0.113.9",
            Utc::now(),
        )];
        assert!(DetectorRegistry::default().run("alice", &events, None).is_empty());
    }

    #[test]
    fn test_override_replaces_set() {
        let custom = SensitiveActions::from_override(Some(&["DeleteTrail".to_string()]));
        assert!(custom.contains("DeleteTrail"));
        assert!(!custom.contains("DeleteUser"));
        assert!(SensitiveActions::from_override(Some(&[])).contains("DeleteUser"));
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            DetectorRegistry::default().names(),
            vec!["ip", "service", "action", "time", "service_sweep"]
        );
    }
}
