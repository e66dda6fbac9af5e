//! Risk Scoring
//!
//! プロファイル（と直近の異常）から0-100のリスクスコアを算出

use super::anomaly::Anomaly;
use super::profile::BehaviorProfile;
use serde::{Deserialize, Serialize};

/// 重要サービスと加点
const SENSITIVE_SERVICES: [(&str, u8); 5] = [
    ("iam", 30),
    ("kms", 25),
    ("lambda", 15),
    ("ec2", 10),
    ("s3", 5),
];

/// リスク帯
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn from_score(score: u8) -> Self {
        if score >= 75 {
            RiskBand::High
        } else if score >= 40 {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "LOW",
            RiskBand::Medium => "MEDIUM",
            RiskBand::High => "HIGH",
        }
    }
}

/// スコアの内訳
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor_type: String,
    pub score: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// 評価結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 最終スコア
    pub score: u8,
    /// プロファイルのみのスコア
    pub base_score: u8,
    pub band: RiskBand,
    pub factors: Vec<RiskFactor>,
}

/// リスクスコア算出器（純粋関数）
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskScorer;

impl RiskScorer {
    /// プロファイルを評価し、直近の異常があれば 0.7/0.3 で合成する
    ///
    /// 合成は常にプロファイル由来の基礎スコアから計算するため、
    /// 繰り返し評価してもスコアは累積しない。
    pub fn assess(profile: &BehaviorProfile, recent_anomalies: &[Anomaly]) -> RiskAssessment {
        let mut factors = Vec::new();
        let mut total: u32 = 0;

        let permission_count = profile.required_permissions.len();
        let breadth = match permission_count {
            n if n > 100 => 40,
            n if n > 50 => 30,
            n if n > 20 => 20,
            n if n > 10 => 10,
            _ => 0,
        };
        if breadth > 0 {
            total += breadth as u32;
            factors.push(RiskFactor {
                factor_type: "permission_breadth".to_string(),
                score: breadth,
                message: format!("{} distinct permissions in use", permission_count),
                count: Some(permission_count),
                service: None,
            });
        }

        for (service, points) in SENSITIVE_SERVICES {
            if profile.service_usage.service_counts.contains_key(service) {
                total += points as u32;
                factors.push(RiskFactor {
                    factor_type: "sensitive_service".to_string(),
                    score: points,
                    message: format!("Uses sensitive service {}", service),
                    count: profile.service_usage.service_counts.get(service).map(|c| *c as usize),
                    service: Some(service.to_string()),
                });
            }
        }

        let wildcards = profile
            .required_permissions
            .iter()
            .filter(|p| p.ends_with(":*"))
            .count();
        let wildcard_points = match wildcards {
            n if n > 5 => 20,
            n if n > 0 => 10,
            _ => 0,
        };
        if wildcard_points > 0 {
            total += wildcard_points as u32;
            factors.push(RiskFactor {
                factor_type: "wildcard_actions".to_string(),
                score: wildcard_points,
                message: format!("{} wildcard actions", wildcards),
                count: Some(wildcards),
                service: None,
            });
        }

        let base_score = total.min(100) as u8;
        let score = match most_recent(recent_anomalies) {
            Some(anomaly) => {
                factors.push(RiskFactor {
                    factor_type: "recent_anomaly".to_string(),
                    score: anomaly.risk_score,
                    message: format!("Most recent anomaly: {}", anomaly.anomaly_type.as_str()),
                    count: Some(recent_anomalies.len()),
                    service: anomaly.service.clone(),
                });
                blend(base_score, anomaly.risk_score)
            }
            None => base_score,
        };

        RiskAssessment {
            score,
            base_score,
            band: RiskBand::from_score(score),
            factors,
        }
    }
}

/// `round(0.7·base + 0.3·anomaly)`
pub fn blend(base: u8, anomaly_score: u8) -> u8 {
    // tenths, rounded half up
    let blended = (7 * base as u32 + 3 * anomaly_score as u32 + 5) / 10;
    blended.min(100) as u8
}

fn most_recent(anomalies: &[Anomaly]) -> Option<&Anomaly> {
    anomalies.iter().max_by_key(|a| a.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::anomaly::AnomalyType;
    use chrono::{Duration, Utc};

    fn profile_with(permissions: usize, services: &[(&str, u64)]) -> BehaviorProfile {
        let mut profile = BehaviorProfile::default();
        for i in 0..permissions {
            profile.required_permissions.insert(format!("s3:Action{}", i));
        }
        for (service, count) in services {
            profile
                .service_usage
                .service_counts
                .insert(service.to_string(), *count);
        }
        profile
    }

    #[test]
    fn test_breadth_and_services() {
        let profile = profile_with(60, &[("iam", 10), ("s3", 100)]);
        let assessment = RiskScorer::assess(&profile, &[]);

        assert_eq!(assessment.score, 65);
        assert_eq!(assessment.band, RiskBand::Medium);
        assert_eq!(assessment.factors.len(), 3);
    }

    #[test]
    fn test_score_is_clamped() {
        let mut profile = profile_with(150, &[("iam", 1), ("kms", 1), ("lambda", 1), ("ec2", 1), ("s3", 1)]);
        for i in 0..6 {
            profile.required_permissions.insert(format!("svc{}:*", i));
        }
        let assessment = RiskScorer::assess(&profile, &[]);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.band, RiskBand::High);
    }

    #[test]
    fn test_wildcard_bands() {
        let mut profile = BehaviorProfile::default();
        profile.required_permissions.insert("s3:*".to_string());
        assert_eq!(RiskScorer::assess(&profile, &[]).score, 10);
    }

    #[test]
    fn test_blend_uses_most_recent_anomaly() {
        let profile = profile_with(60, &[("iam", 10), ("s3", 100)]);
        let now = Utc::now();
        let mut older = Anomaly::builder("alice", AnomalyType::SensitiveAction, now).build();
        older.timestamp = now - Duration::hours(2);
        let newer = Anomaly::builder("alice", AnomalyType::NewApiCall, now).build();

        let assessment = RiskScorer::assess(&profile, &[older, newer]);
        // round(0.7 * 65 + 0.3 * 40) = 57.5 → 58
        assert_eq!(assessment.score, 58);
        assert_eq!(assessment.base_score, 65);
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(RiskBand::from_score(39), RiskBand::Low);
        assert_eq!(RiskBand::from_score(40), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(75), RiskBand::High);
    }
}
