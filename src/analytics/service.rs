//! Security Analytics Service
//!
//! HTTP・CLIから呼ばれる分析操作の窓口

use super::anomaly::Anomaly;
use super::events::EventFetcher;
use super::profiler::{BehaviorProfiler, UserAnalysisReport};
use super::risk::{RiskBand, RiskFactor, RiskScorer};
use super::scanner::{AnomalyScanner, ScanReport};
use crate::config::AnalyticsConfig;
use crate::error::{Error, Result};
use crate::store::ProfileRepository;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 合成に使う「直近」の範囲
const RECENT_ANOMALY_WINDOW_DAYS: i64 = 7;
const MAX_ANOMALY_PAGE: usize = 500;

/// リスクスコア照会結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScoreReport {
    pub user_arn: String,
    pub risk_score: u8,
    pub base_risk_score: u8,
    pub risk_level: RiskBand,
    pub factors: Vec<RiskFactor>,
    pub last_analyzed: DateTime<Utc>,
    pub recent_anomalies: usize,
}

pub struct SecurityAnalytics {
    fetcher: Arc<EventFetcher>,
    profiler: BehaviorProfiler,
    scanner: AnomalyScanner,
    repository: ProfileRepository,
    config: AnalyticsConfig,
}

impl SecurityAnalytics {
    pub fn new(
        fetcher: Arc<EventFetcher>,
        profiler: BehaviorProfiler,
        scanner: AnomalyScanner,
        repository: ProfileRepository,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            fetcher,
            profiler,
            scanner,
            repository,
            config,
        }
    }

    pub fn default_days(&self) -> u32 {
        self.config.default_days
    }

    /// プロファイル作成とスコア算出
    pub async fn analyze_user(&self, user_arn: &str, days: Option<u32>) -> Result<UserAnalysisReport> {
        let user_arn = require_arn(user_arn)?;
        self.profiler
            .analyze_user(user_arn, days.unwrap_or(self.config.default_days))
            .await
    }

    /// アカウント全体の異常スキャン
    pub async fn detect_anomalies(&self, days: Option<u32>) -> Result<ScanReport> {
        let days = days.unwrap_or(1);
        if days == 0 || days > 90 {
            return Err(Error::InputInvalid("days must be between 1 and 90".to_string()));
        }
        let end = Utc::now();
        let start = end - Duration::days(days as i64);
        let events = self
            .fetcher
            .fetch_account(start, end, self.config.account_event_cap)
            .await?;
        Ok(self.scanner.scan_account(events, days).await)
    }

    /// 1主体の直近イベントのみを検査
    pub async fn scan_user(&self, user_arn: &str, days: u32) -> Result<Vec<Anomaly>> {
        let user_arn = require_arn(user_arn)?;
        let end = Utc::now();
        let start = end - Duration::days(days.max(1) as i64);
        let events = self.fetcher.fetch_for_identity(user_arn, start, end).await?;
        Ok(self.scanner.scan_identity(user_arn, &events).await)
    }

    /// 保存済みプロファイルと直近の異常からスコアを算出
    pub async fn get_risk_score(&self, user_arn: &str) -> Result<RiskScoreReport> {
        let user_arn = require_arn(user_arn)?;
        let profile = self
            .repository
            .get_profile(user_arn)
            .await
            .ok_or_else(|| Error::NotFound(format!("no behavior profile for {}", user_arn)))?;

        let since = Utc::now() - Duration::days(RECENT_ANOMALY_WINDOW_DAYS);
        let recent = self.repository.recent_anomalies(user_arn, since).await;
        let assessment = RiskScorer::assess(&profile, &recent);

        Ok(RiskScoreReport {
            user_arn: user_arn.to_string(),
            risk_score: assessment.score,
            base_risk_score: assessment.base_score,
            risk_level: assessment.band,
            factors: assessment.factors,
            last_analyzed: profile.last_analyzed,
            recent_anomalies: recent.len(),
        })
    }

    /// 新しい順の異常一覧
    pub async fn get_anomaly_events(&self, user_arn: &str, limit: Option<usize>) -> Result<Vec<Anomaly>> {
        let user_arn = require_arn(user_arn)?;
        let limit = limit.unwrap_or(50).clamp(1, MAX_ANOMALY_PAGE);
        Ok(self.repository.list_anomalies(user_arn, Some(limit)).await)
    }
}

fn require_arn(user_arn: &str) -> Result<&str> {
    let trimmed = user_arn.trim();
    if trimmed.is_empty() {
        return Err(Error::InputInvalid("user_arn is required".to_string()));
    }
    Ok(trimmed)
}
