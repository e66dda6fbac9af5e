use super::detector::AnomalyDetector;
use super::types::{Anomaly, AnomalyType};
use crate::analytics::events::Event;
use crate::analytics::profile::BehaviorProfile;
use chrono::{Datelike, Timelike};
use serde_json::json;

/// 1スキャンあたりの `unusual_time` 上限
pub const UNUSUAL_TIME_CAP: usize = 5;

/// 活動時間帯・主要曜日の両方から外れたイベント
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeDetector;

impl AnomalyDetector for TimeDetector {
    fn name(&self) -> &'static str {
        "time"
    }

    fn detect(&self, identity: &str, events: &[Event], profile: &BehaviorProfile) -> Vec<Anomaly> {
        let patterns = &profile.normal_patterns;

        events
            .iter()
            .filter(|event| {
                let hour = event.event_time.hour();
                let weekday = event.event_time.weekday().num_days_from_monday();
                !patterns.active_hours.contains(&hour) && !patterns.primary_days.contains(&weekday)
            })
            .take(UNUSUAL_TIME_CAP)
            .map(|event| {
                Anomaly::builder(identity, AnomalyType::UnusualTime, event.event_time)
                    .action(&event.event_name)
                    .service(event.service())
                    .details(json!({
                        "hour": event.event_time.hour(),
                        "weekday": event.event_time.weekday().num_days_from_monday(),
                        "active_hours": patterns.active_hours,
                        "primary_days": patterns.primary_days,
                    }))
                    .build()
            })
            .collect()
    }
}
