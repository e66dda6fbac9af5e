use super::detector::AnomalyDetector;
use super::types::{Anomaly, AnomalyType};
use crate::analytics::events::Event;
use crate::analytics::profile::BehaviorProfile;
use serde_json::json;
use std::collections::BTreeSet;

/// 未知の送信元IP（スキャン内で初回のみ）
#[derive(Debug, Default, Clone, Copy)]
pub struct IpDetector;

impl AnomalyDetector for IpDetector {
    fn name(&self) -> &'static str {
        "ip"
    }

    fn detect(&self, identity: &str, events: &[Event], profile: &BehaviorProfile) -> Vec<Anomaly> {
        let mut seen = BTreeSet::new();
        let mut anomalies = Vec::new();

        for event in events {
            if event.is_internal() || profile.ip_addresses.contains(&event.source_ip) {
                continue;
            }
            if !seen.insert(event.source_ip.as_str()) {
                continue;
            }
            anomalies.push(
                Anomaly::builder(identity, AnomalyType::NewIpAddress, event.event_time)
                    .source_ip(&event.source_ip)
                    .details(json!({
                        "event_name": event.event_name,
                        "event_source": event.event_source,
                        "known_ips": profile.ip_addresses.len(),
                    }))
                    .build(),
            );
        }
        anomalies
    }
}
