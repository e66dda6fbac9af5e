//! Behavior Profile Types
//!
//! 行動プロファイルと分析結果の型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// サービス利用状況
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceUsage {
    /// サービス別呼び出し回数
    pub service_counts: BTreeMap<String, u64>,
    /// アクション別呼び出し回数
    pub api_counts: BTreeMap<String, u64>,
    /// 呼び出し回数上位のアクション（最大20件）
    pub frequent_apis: Vec<String>,
}

/// リソースアクセス傾向
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPatterns {
    pub resource_types: BTreeMap<String, u64>,
    pub resource_names: BTreeMap<String, u64>,
}

/// 送信元ロケーション
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub ip: String,
    pub country: String,
    pub city: String,
    pub count: u64,
}

/// 時間帯パターン
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalPatterns {
    /// 時刻別（UTC 0-23時）
    pub hour_counts: [u64; 24],
    /// 曜日別（月曜=0）
    pub day_counts: [u64; 7],
    /// 平均の2倍を超える時刻
    pub active_hours: Vec<u32>,
    /// 平均の2倍を超える曜日
    pub primary_days: Vec<u32>,
}

/// 行動プロファイル
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorProfile {
    pub user_arn: String,
    pub last_analyzed: DateTime<Utc>,
    pub analyzed_days: u32,
    /// 実際に使用された `service:Action`
    pub required_permissions: BTreeSet<String>,
    pub service_usage: ServiceUsage,
    pub access_patterns: AccessPatterns,
    /// `"A → B"` 形式の連続アクション（上位10件）
    pub action_sequences: BTreeMap<String, u64>,
    pub locations: Vec<Location>,
    pub ip_addresses: BTreeSet<String>,
    pub normal_patterns: NormalPatterns,
    /// 直近の異常を加味したスコア
    pub risk_score: u8,
    /// プロファイルのみから算出したスコア
    pub base_risk_score: u8,
    pub events_count: u64,
    pub updated_at: DateTime<Utc>,
    /// 楽観ロック用バージョン
    pub version: u64,
}

impl BehaviorProfile {
    /// 利用回数上位のサービス
    pub fn top_services(&self, n: usize) -> Vec<(String, u64)> {
        super::profiler::top_n(&self.service_usage.service_counts, n)
    }
}

/// 分析種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    BehaviorAnalysis,
    AnomalyScan,
}

/// 分析結果サマリー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub user_arn: String,
    #[serde(rename = "type")]
    pub analysis_type: AnalysisKind,
    pub timestamp: DateTime<Utc>,
    pub period_days: u32,
    pub events_analyzed: u64,
    pub risk_score: u8,
}

impl AnalysisResult {
    pub fn new(
        user_arn: impl Into<String>,
        analysis_type: AnalysisKind,
        period_days: u32,
        events_analyzed: u64,
        risk_score: u8,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_arn: user_arn.into(),
            analysis_type,
            timestamp: Utc::now(),
            period_days,
            events_analyzed,
            risk_score,
        }
    }
}
