use super::detector::AnomalyDetector;
use super::types::{Anomaly, AnomalyType};
use crate::analytics::events::Event;
use crate::analytics::profile::BehaviorProfile;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;

/// 網羅的な呼び出しとみなす異なるアクション数
pub const SWEEP_THRESHOLD: usize = 5;

/// 1サービスへの多種アクション呼び出し
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceSweepDetector;

impl AnomalyDetector for ServiceSweepDetector {
    fn name(&self) -> &'static str {
        "service_sweep"
    }

    fn detect(&self, identity: &str, events: &[Event], _profile: &BehaviorProfile) -> Vec<Anomaly> {
        // service -> distinct actions in first-seen order
        let mut actions: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        // service -> time the threshold was first reached
        let mut triggered: Vec<(&str, DateTime<Utc>)> = Vec::new();

        for event in events {
            let service = event.service();
            let seen = actions.entry(service).or_default();
            if seen.contains(&event.event_name.as_str()) {
                continue;
            }
            seen.push(event.event_name.as_str());
            if seen.len() == SWEEP_THRESHOLD {
                triggered.push((service, event.event_time));
            }
        }

        triggered
            .into_iter()
            .map(|(service, at)| {
                let api_calls = actions.get(service).cloned().unwrap_or_default();
                Anomaly::builder(identity, AnomalyType::ServiceSweep, at)
                    .service(service)
                    .details(json!({
                        "api_calls": api_calls,
                        "distinct_actions": api_calls.len(),
                    }))
                    .build()
            })
            .collect()
    }
}
