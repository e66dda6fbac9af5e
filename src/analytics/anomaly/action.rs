use super::detector::{AnomalyDetector, SensitiveActions};
use super::types::{Anomaly, AnomalyType};
use crate::analytics::events::Event;
use crate::analytics::profile::BehaviorProfile;
use serde_json::json;
use std::collections::BTreeSet;

/// 1スキャンあたりの `new_api_call` 上限
pub const NEW_API_CALL_CAP: usize = 10;

/// 重要アクションと頻出外のAPI呼び出し
#[derive(Debug, Clone)]
pub struct ActionDetector {
    sensitive: SensitiveActions,
}

impl ActionDetector {
    pub fn new(sensitive: SensitiveActions) -> Self {
        Self { sensitive }
    }
}

impl AnomalyDetector for ActionDetector {
    fn name(&self) -> &'static str {
        "action"
    }

    fn detect(&self, identity: &str, events: &[Event], profile: &BehaviorProfile) -> Vec<Anomaly> {
        let frequent: BTreeSet<&str> = profile
            .service_usage
            .frequent_apis
            .iter()
            .map(String::as_str)
            .collect();
        let mut reported = BTreeSet::new();
        let mut new_calls = 0;
        let mut anomalies = Vec::new();

        for event in events {
            let action = event.event_name.as_str();
            if self.sensitive.contains(action) {
                anomalies.push(
                    Anomaly::builder(identity, AnomalyType::SensitiveAction, event.event_time)
                        .action(action)
                        .service(event.service())
                        .details(json!({
                            "source_ip": event.source_ip,
                            "resources": event.all_resources(),
                        }))
                        .build(),
                );
            }
            if !frequent.contains(action) && new_calls < NEW_API_CALL_CAP && reported.insert(action) {
                new_calls += 1;
                anomalies.push(
                    Anomaly::builder(identity, AnomalyType::NewApiCall, event.event_time)
                        .action(action)
                        .service(event.service())
                        .details(json!({ "source_ip": event.source_ip }))
                        .build(),
                );
            }
        }
        anomalies
    }
}
