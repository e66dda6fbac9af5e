//! Anomaly Detection
//!
//! プロファイルとの比較による異常検知

mod action;
mod detector;
mod ip;
mod service;
mod sweep;
mod time;
mod types;

pub use action::{ActionDetector, NEW_API_CALL_CAP};
pub use detector::{AnomalyDetector, DetectorRegistry, SensitiveActions, DEFAULT_SENSITIVE_ACTIONS};
pub use ip::IpDetector;
pub use service::ServiceDetector;
pub use sweep::{ServiceSweepDetector, SWEEP_THRESHOLD};
pub use time::{TimeDetector, UNUSUAL_TIME_CAP};
pub use types::{Anomaly, AnomalyBuilder, AnomalyType};
