//! Behavior Profiler
//!
//! イベント列から6次元の行動プロファイルを導出する

use super::events::{username_from_identity, Event, EventFetcher};
use super::geo::{resolve_or_unknown, GeoResolver};
use super::policy::{collect_allowed_actions, unused_permissions, IdentityPolicyApi};
use super::profile::{
    AccessPatterns, AnalysisKind, AnalysisResult, BehaviorProfile, Location, NormalPatterns,
    ServiceUsage,
};
use super::risk::{RiskBand, RiskScorer};
use crate::error::{Error, Result};
use crate::store::ProfileRepository;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

const FREQUENT_API_COUNT: usize = 20;
const SEQUENCE_COUNT: usize = 10;
const LOCATION_COUNT: usize = 5;
const TOP_SERVICE_COUNT: usize = 5;

/// 件数降順、同数はキーの辞書順
pub fn top_n(counts: &BTreeMap<String, u64>, n: usize) -> Vec<(String, u64)> {
    let mut entries: Vec<(String, u64)> = counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

fn tally<'a>(counts: &mut BTreeMap<String, u64>, key: impl Into<std::borrow::Cow<'a, str>>) {
    *counts.entry(key.into().into_owned()).or_insert(0) += 1;
}

/// イベント列からプロファイルを導出する（純粋関数）
///
/// リスクスコアもここで算出する。`version` / `updated_at` は保存時に決まる。
pub fn derive_profile(
    identity: &str,
    events: &[Event],
    days: u32,
    now: DateTime<Utc>,
    geo: &dyn GeoResolver,
) -> BehaviorProfile {
    let mut required_permissions = BTreeSet::new();
    let mut usage = ServiceUsage::default();
    let mut access = AccessPatterns::default();
    let mut ip_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut patterns = NormalPatterns::default();

    for event in events {
        required_permissions.insert(event.permission());
        tally(&mut usage.service_counts, event.service());
        tally(&mut usage.api_counts, event.event_name.as_str());

        for resource in event.all_resources() {
            tally(&mut access.resource_types, resource.resource_type);
            tally(&mut access.resource_names, resource.resource_name);
        }

        if !event.is_internal() && !event.source_ip.is_empty() {
            tally(&mut ip_counts, event.source_ip.as_str());
        }

        patterns.hour_counts[event.event_time.hour() as usize] += 1;
        patterns.day_counts[event.event_time.weekday().num_days_from_monday() as usize] += 1;
    }

    usage.frequent_apis = top_n(&usage.api_counts, FREQUENT_API_COUNT)
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    let total: u64 = patterns.hour_counts.iter().sum();
    // count > 2 × mean, kept in integers
    patterns.active_hours = (0..24u32)
        .filter(|h| patterns.hour_counts[*h as usize] * 48 > total && total > 0)
        .collect();
    patterns.primary_days = (0..7u32)
        .filter(|d| patterns.day_counts[*d as usize] * 14 > total && total > 0)
        .collect();

    let locations = top_n(&ip_counts, LOCATION_COUNT)
        .into_iter()
        .map(|(ip, count)| {
            let geo = resolve_or_unknown(geo, &ip);
            Location {
                ip,
                country: geo.country,
                city: geo.city,
                count,
            }
        })
        .collect();

    let mut profile = BehaviorProfile {
        user_arn: identity.to_string(),
        last_analyzed: now,
        analyzed_days: days,
        required_permissions,
        service_usage: usage,
        access_patterns: access,
        action_sequences: action_sequences(events),
        locations,
        ip_addresses: ip_counts.into_keys().collect(),
        normal_patterns: patterns,
        risk_score: 0,
        base_risk_score: 0,
        events_count: events.len() as u64,
        updated_at: now,
        version: 0,
    };

    let assessment = RiskScorer::assess(&profile, &[]);
    profile.base_risk_score = assessment.base_score;
    profile.risk_score = assessment.score;
    profile
}

/// 時刻順に並べた連続ペア `"A → B"` の上位10件
fn action_sequences(events: &[Event]) -> BTreeMap<String, u64> {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by_key(|e| e.event_time);

    let mut pairs: BTreeMap<String, u64> = BTreeMap::new();
    for window in ordered.windows(2) {
        tally(
            &mut pairs,
            format!("{} → {}", window[0].event_name, window[1].event_name),
        );
    }
    top_n(&pairs, SEQUENCE_COUNT).into_iter().collect()
}

/// サービス別利用回数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCount {
    pub service: String,
    pub count: u64,
}

/// ユーザー分析の結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAnalysisReport {
    pub user_arn: String,
    pub analyzed_days: u32,
    pub events_analyzed: u64,
    pub risk_score: u8,
    pub risk_level: RiskBand,
    pub top_services: Vec<ServiceCount>,
    pub required_permissions_count: usize,
    /// ポリシーを取得できなかった場合は `None`
    pub unused_permissions_count: Option<usize>,
    pub unused_permissions: Vec<String>,
    pub active_hours: Vec<u32>,
    pub locations: Vec<Location>,
    pub profile_saved: bool,
}

/// プロファイル作成の実行部
pub struct BehaviorProfiler {
    fetcher: Arc<EventFetcher>,
    repository: ProfileRepository,
    policies: Option<Arc<dyn IdentityPolicyApi>>,
    geo: Arc<dyn GeoResolver>,
}

impl BehaviorProfiler {
    pub fn new(
        fetcher: Arc<EventFetcher>,
        repository: ProfileRepository,
        policies: Option<Arc<dyn IdentityPolicyApi>>,
        geo: Arc<dyn GeoResolver>,
    ) -> Self {
        Self {
            fetcher,
            repository,
            policies,
            geo,
        }
    }

    /// `[now − days, now]` のイベントからプロファイルを作成・保存
    pub async fn analyze_user(&self, user_arn: &str, days: u32) -> Result<UserAnalysisReport> {
        if days == 0 || days > 90 {
            return Err(Error::InputInvalid("days must be between 1 and 90".to_string()));
        }

        let end = Utc::now();
        let start = end - Duration::days(days as i64);
        let events = self.fetcher.fetch_for_identity(user_arn, start, end).await?;
        if events.is_empty() {
            return Err(Error::NotFound(format!(
                "no events for {} in the last {} days",
                user_arn, days
            )));
        }

        let profile = derive_profile(user_arn, &events, days, end, self.geo.as_ref());
        let saved = self.repository.save_profile(&profile).await;
        let result = AnalysisResult::new(
            user_arn,
            AnalysisKind::BehaviorAnalysis,
            days,
            profile.events_count,
            profile.risk_score,
        );
        self.repository.put_analysis_result(&result).await;

        let unused = self.unused_permissions(user_arn, &profile).await;

        info!(
            user_arn,
            days,
            events = profile.events_count,
            risk_score = profile.risk_score,
            "behavior analysis complete"
        );

        Ok(UserAnalysisReport {
            user_arn: user_arn.to_string(),
            analyzed_days: days,
            events_analyzed: profile.events_count,
            risk_score: profile.risk_score,
            risk_level: RiskBand::from_score(profile.risk_score),
            top_services: profile
                .top_services(TOP_SERVICE_COUNT)
                .into_iter()
                .map(|(service, count)| ServiceCount { service, count })
                .collect(),
            required_permissions_count: profile.required_permissions.len(),
            unused_permissions_count: unused.as_ref().map(BTreeSet::len),
            unused_permissions: unused.map(|u| u.into_iter().collect()).unwrap_or_default(),
            active_hours: profile.normal_patterns.active_hours.clone(),
            locations: profile.locations.clone(),
            profile_saved: saved.is_some(),
        })
    }

    async fn unused_permissions(&self, user_arn: &str, profile: &BehaviorProfile) -> Option<BTreeSet<String>> {
        let api = self.policies.as_ref()?;
        let user_name = username_from_identity(user_arn);
        match collect_allowed_actions(api.as_ref(), user_name).await {
            Ok(allowed) => Some(unused_permissions(&allowed, &profile.required_permissions)),
            Err(e) => {
                warn!(user_arn, error = %e, "could not read identity policies");
                None
            }
        }
    }
}
