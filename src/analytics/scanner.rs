//! Anomaly Scanner
//!
//! 保存済みプロファイルを基準にイベントを検査し、異常を保存・通知する

use super::anomaly::{Anomaly, DetectorRegistry};
use super::events::Event;
use super::profile::{AnalysisKind, AnalysisResult};
use crate::alerts::{AlertChannel, SecurityAlert};
use crate::store::ProfileRepository;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// アカウント全体スキャンの結果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub period_days: u32,
    pub events_scanned: usize,
    pub identities_scanned: usize,
    /// 基準プロファイルが無く検査しなかった主体
    pub identities_without_profile: usize,
    pub anomalies: Vec<Anomaly>,
    pub duplicates_skipped: usize,
    pub alert_sent: bool,
}

/// スキャナー設定
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub alert_threshold: u8,
    pub alert_topic: Option<String>,
    pub dedupe: bool,
}

pub struct AnomalyScanner {
    registry: DetectorRegistry,
    repository: ProfileRepository,
    alerts: Arc<dyn AlertChannel>,
    settings: ScannerSettings,
}

impl AnomalyScanner {
    pub fn new(
        registry: DetectorRegistry,
        repository: ProfileRepository,
        alerts: Arc<dyn AlertChannel>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            registry,
            repository,
            alerts,
            settings,
        }
    }

    /// 1主体分を検査して保存（プロファイルが無ければ空）
    pub async fn scan_identity(&self, identity: &str, events: &[Event]) -> Vec<Anomaly> {
        let profile = self.repository.get_profile(identity).await;
        let anomalies = self.registry.run(identity, events, profile.as_ref());
        for anomaly in &anomalies {
            self.repository.put_anomaly(anomaly).await;
        }
        anomalies
    }

    /// 主体ごとに分けて検査し、閾値以上があれば通知する
    pub async fn scan_account(&self, events: Vec<Event>, period_days: u32) -> ScanReport {
        let events_scanned = events.len();
        let mut by_identity: BTreeMap<String, Vec<Event>> = BTreeMap::new();
        for event in events {
            if event.identity.is_empty() {
                continue;
            }
            by_identity.entry(event.identity.clone()).or_default().push(event);
        }

        let mut report = ScanReport {
            period_days,
            events_scanned,
            identities_scanned: by_identity.len(),
            ..Default::default()
        };

        for (identity, batch) in &by_identity {
            let Some(profile) = self.repository.get_profile(identity).await else {
                debug!(user_arn = %identity, "no profile, skipping");
                report.identities_without_profile += 1;
                continue;
            };

            let found = self.registry.run(identity, batch, Some(&profile));
            let known = if self.settings.dedupe {
                self.known_fingerprints(identity).await
            } else {
                BTreeSet::new()
            };

            let mut written = Vec::new();
            for anomaly in found {
                if known.contains(&anomaly.fingerprint()) {
                    report.duplicates_skipped += 1;
                    continue;
                }
                self.repository.put_anomaly(&anomaly).await;
                written.push(anomaly);
            }

            let max_score = written.iter().map(|a| a.risk_score).max().unwrap_or(0);
            let summary = AnalysisResult::new(
                identity.as_str(),
                AnalysisKind::AnomalyScan,
                period_days,
                batch.len() as u64,
                max_score,
            );
            self.repository.put_analysis_result(&summary).await;
            report.anomalies.extend(written);
        }

        report.alert_sent = self.maybe_alert(&report.anomalies).await;

        info!(
            events = report.events_scanned,
            identities = report.identities_scanned,
            anomalies = report.anomalies.len(),
            duplicates = report.duplicates_skipped,
            alert_sent = report.alert_sent,
            "account scan complete"
        );
        report
    }

    async fn known_fingerprints(&self, identity: &str) -> BTreeSet<String> {
        self.repository
            .list_anomalies(identity, None)
            .await
            .iter()
            .map(Anomaly::fingerprint)
            .collect()
    }

    async fn maybe_alert(&self, anomalies: &[Anomaly]) -> bool {
        let Some(alert) = SecurityAlert::from_anomalies(anomalies, self.settings.alert_threshold) else {
            return false;
        };
        let topic = self.settings.alert_topic.as_deref().unwrap_or("security-alerts");
        let body = match alert.body() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to render alert");
                return false;
            }
        };

        match self.alerts.publish(topic, &body, Some(&alert.subject())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "alert publish failed");
                false
            }
        }
    }
}
