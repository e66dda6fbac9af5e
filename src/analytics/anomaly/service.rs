use super::detector::AnomalyDetector;
use super::types::{Anomaly, AnomalyType};
use crate::analytics::events::Event;
use crate::analytics::profile::BehaviorProfile;
use serde_json::json;
use std::collections::BTreeSet;

/// 未使用だったサービス（スキャン内で初回のみ）
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceDetector;

impl AnomalyDetector for ServiceDetector {
    fn name(&self) -> &'static str {
        "service"
    }

    fn detect(&self, identity: &str, events: &[Event], profile: &BehaviorProfile) -> Vec<Anomaly> {
        let known = &profile.service_usage.service_counts;
        let mut seen = BTreeSet::new();
        let mut anomalies = Vec::new();

        for event in events {
            let service = event.service();
            if known.contains_key(service) || !seen.insert(service) {
                continue;
            }
            anomalies.push(
                Anomaly::builder(identity, AnomalyType::NewServiceUsage, event.event_time)
                    .service(service)
                    .details(json!({
                        "event_name": event.event_name,
                        "source_ip": event.source_ip,
                    }))
                    .build(),
            );
        }
        anomalies
    }
}
