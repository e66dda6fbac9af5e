//! Analytics Module
//!
//! 行動プロファイル・リスクスコア・異常検知

pub mod anomaly;
pub mod events;
pub mod geo;
pub mod policy;
pub mod profile;
pub mod profiler;
pub mod risk;
pub mod scanner;
pub mod service;

pub use anomaly::{Anomaly, AnomalyDetector, AnomalyType, DetectorRegistry, SensitiveActions};
pub use events::{Event, EventFetcher, EventLookupApi, LookupPage, LookupRequest, ResourceRef};
pub use geo::{GeoResolver, StaticGeoResolver, UnknownGeoResolver};
pub use policy::{AttachedPolicy, IdentityPolicyApi};
pub use profile::{AnalysisKind, AnalysisResult, BehaviorProfile};
pub use profiler::{derive_profile, BehaviorProfiler, UserAnalysisReport};
pub use risk::{RiskAssessment, RiskBand, RiskFactor, RiskScorer};
pub use scanner::{AnomalyScanner, ScanReport, ScannerSettings};
pub use service::{RiskScoreReport, SecurityAnalytics};
