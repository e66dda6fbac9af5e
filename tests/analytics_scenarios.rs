//! 行動分析・異常検知の統合テスト

mod common;

use chrono::{Duration, TimeZone, Utc};
use cloudlens_rs::analytics::{
    AnomalyType, BehaviorProfile, DetectorRegistry, RiskBand, RiskScorer, SensitiveActions,
};
use cloudlens_rs::app::App;
use cloudlens_rs::config::AppConfig;
use cloudlens_rs::store::SqliteStore;
use cloudlens_rs::ErrorKind;
use common::{event, Fakes, FakeEvents, ScriptedLlm};
use std::sync::Arc;

const ALICE: &str = "arn:aws:iam::123456789012:user/alice";

/// 既知のIP・サービス・全時間帯を持つプロファイル
fn quiet_profile(user_arn: &str) -> BehaviorProfile {
    let mut profile = BehaviorProfile {
        user_arn: user_arn.to_string(),
        ..Default::default()
    };
    profile.ip_addresses.insert("10.0.0.1".to_string());
    profile.normal_patterns.active_hours = (0..24).collect();
    profile.normal_patterns.primary_days = (0..7).collect();
    profile
}

fn app_with(fakes: &Fakes) -> App {
    App::with_backends(AppConfig::default(), fakes.backends()).unwrap()
}

#[test]
fn test_risk_score_breadth() {
    let mut profile = quiet_profile(ALICE);
    for i in 0..60 {
        profile.required_permissions.insert(format!("s3:GetObject{}", i));
    }
    profile.service_usage.service_counts.insert("iam".to_string(), 10);
    profile.service_usage.service_counts.insert("s3".to_string(), 100);

    let assessment = RiskScorer::assess(&profile, &[]);
    assert_eq!(assessment.score, 65);
    assert_eq!(assessment.base_score, 65);
    assert_eq!(assessment.band, RiskBand::Medium);
    let kinds: Vec<&str> = assessment.factors.iter().map(|f| f.factor_type.as_str()).collect();
    assert_eq!(kinds, vec!["permission_breadth", "sensitive_service", "sensitive_service"]);
}

#[test]
fn test_sensitive_action_detection() {
    let mut profile = quiet_profile(ALICE);
    profile.service_usage.service_counts.insert("ec2".to_string(), 4);
    profile.service_usage.frequent_apis = vec!["TerminateInstances".to_string()];
    let batch = vec![event(ALICE, "TerminateInstances", "ec2.amazonaws.com", "10.0.0.1", Utc::now())];

    let anomalies = DetectorRegistry::standard(SensitiveActions::default()).run(ALICE, &batch, Some(&profile));
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].anomaly_type, AnomalyType::SensitiveAction);
    assert_eq!(anomalies[0].action.as_deref(), Some("TerminateInstances"));
    assert_eq!(anomalies[0].risk_score, 75);
}

#[test]
fn test_new_ip_reported_once() {
    let mut profile = quiet_profile(ALICE);
    profile.service_usage.service_counts.insert("s3".to_string(), 20);
    profile.service_usage.frequent_apis = vec!["GetObject".to_string()];

    let start = Utc::now() - Duration::hours(1);
    let batch: Vec<_> = (0..5)
        .map(|i| {
            let ip = if i < 3 { "10.0.0.1" } else { "198.51.100.7" };
            event(ALICE, "GetObject", "s3.amazonaws.com", ip, start + Duration::minutes(i))
        })
        .collect();

    let anomalies = DetectorRegistry::standard(SensitiveActions::default()).run(ALICE, &batch, Some(&profile));
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].anomaly_type, AnomalyType::NewIpAddress);
    assert_eq!(anomalies[0].source_ip.as_deref(), Some("198.51.100.7"));
    assert_eq!(anomalies[0].risk_score, 60);
}

#[test]
fn test_service_sweep() {
    let mut profile = quiet_profile(ALICE);
    profile.service_usage.service_counts.insert("s3".to_string(), 12);
    let actions = [
        "ListUsers",
        "ListRoles",
        "GetUser",
        "GetRole",
        "AttachRolePolicy",
        "DetachRolePolicy",
    ];

    let start = Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap();
    let batch: Vec<_> = actions
        .iter()
        .enumerate()
        .map(|(i, action)| event(ALICE, action, "iam.amazonaws.com", "10.0.0.1", start + Duration::seconds(i as i64)))
        .collect();

    let anomalies = DetectorRegistry::standard(SensitiveActions::default()).run(ALICE, &batch, Some(&profile));
    let of = |kind: AnomalyType| anomalies.iter().filter(|a| a.anomaly_type == kind).collect::<Vec<_>>();

    let sweeps = of(AnomalyType::ServiceSweep);
    assert_eq!(sweeps.len(), 1);
    assert_eq!(sweeps[0].service.as_deref(), Some("iam"));
    assert_eq!(sweeps[0].details["api_calls"], serde_json::json!(actions));

    let new_service = of(AnomalyType::NewServiceUsage);
    assert_eq!(new_service.len(), 1);
    assert_eq!(new_service[0].service.as_deref(), Some("iam"));

    let sensitive = of(AnomalyType::SensitiveAction);
    assert_eq!(sensitive.len(), 1);
    assert_eq!(sensitive[0].action.as_deref(), Some("DetachRolePolicy"));

    // no frequent APIs yet, so every distinct action is new
    let new_calls: Vec<_> = of(AnomalyType::NewApiCall).iter().filter_map(|a| a.action.clone()).collect();
    assert_eq!(new_calls, actions.map(String::from));

    assert!(of(AnomalyType::NewIpAddress).is_empty());
    assert!(of(AnomalyType::UnusualTime).is_empty());
    assert_eq!(anomalies.len(), 9);
}

#[tokio::test]
async fn test_analyze_then_score() {
    let now = Utc::now();
    let fakes = Fakes {
        events: FakeEvents::with(vec![
            event(ALICE, "ListUsers", "iam.amazonaws.com", "10.0.0.1", now - Duration::hours(3)),
            event(ALICE, "GetObject", "s3.amazonaws.com", "10.0.0.1", now - Duration::hours(2)),
            event(ALICE, "GetObject", "s3.amazonaws.com", "10.0.0.2", now - Duration::hours(1)),
            event("arn:aws:iam::123456789012:user/bob", "ListRoles", "iam.amazonaws.com", "10.9.9.9", now),
        ]),
        ..Fakes::new(ScriptedLlm::texts(&[]))
    };
    let app = app_with(&fakes);

    let report = app.analytics.analyze_user(ALICE, Some(7)).await.unwrap();
    assert_eq!(report.events_analyzed, 3);
    assert_eq!(report.analyzed_days, 7);
    assert!(report.profile_saved);
    assert_eq!(report.required_permissions_count, 2);
    assert_eq!(report.unused_permissions_count, None);

    let request = fakes.events.requests.lock().unwrap()[0].clone();
    assert_eq!(request.attribute.unwrap().value, "alice");

    let score = app.analytics.get_risk_score(ALICE).await.unwrap();
    assert_eq!(score.risk_score, report.risk_score);
    assert_eq!(score.recent_anomalies, 0);

    let stored = app.repository.get_profile(ALICE).await.unwrap();
    assert_eq!(stored.ip_addresses.len(), 2);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_analyze_rejects_bad_input() {
    let app = app_with(&Fakes::new(ScriptedLlm::texts(&[])));

    let err = app.analytics.analyze_user("  ", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputInvalid);

    let err = app.analytics.analyze_user(ALICE, Some(0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputInvalid);

    // no events in the window
    let err = app.analytics.analyze_user(ALICE, Some(3)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = app.analytics.get_risk_score(ALICE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_account_scan_alerts_and_dedupes() {
    let now = Utc::now() - Duration::minutes(5);
    let fakes = Fakes {
        events: FakeEvents::with(vec![
            event(ALICE, "TerminateInstances", "ec2.amazonaws.com", "10.0.0.1", now),
            event("arn:aws:iam::123456789012:user/nobody", "DeleteUser", "iam.amazonaws.com", "10.0.0.1", now),
        ]),
        ..Fakes::new(ScriptedLlm::texts(&[]))
    };
    let app = app_with(&fakes);

    let mut profile = quiet_profile(ALICE);
    profile.service_usage.service_counts.insert("ec2".to_string(), 4);
    profile.service_usage.frequent_apis = vec!["TerminateInstances".to_string()];
    app.repository.save_profile(&profile).await.unwrap();

    let first = app.analytics.detect_anomalies(Some(1)).await.unwrap();
    assert_eq!(first.events_scanned, 2);
    assert_eq!(first.identities_scanned, 2);
    assert_eq!(first.identities_without_profile, 1);
    assert_eq!(first.anomalies.len(), 1);
    assert!(first.alert_sent);

    {
        let published = fakes.alerts.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "security-alerts");
        assert!(published[0].1.contains("TerminateInstances"));
        assert!(published[0].2.as_deref().unwrap().starts_with("[CRITICAL]"));
    }

    let second = app.analytics.detect_anomalies(Some(1)).await.unwrap();
    assert!(second.anomalies.is_empty());
    assert_eq!(second.duplicates_skipped, 1);
    assert!(!second.alert_sent);

    let listed = app.analytics.get_anomaly_events(ALICE, Some(10)).await.unwrap();
    assert_eq!(listed.len(), 1);

    // the stored anomaly now feeds the blended score
    let score = app.analytics.get_risk_score(ALICE).await.unwrap();
    assert_eq!(score.base_risk_score, 10);
    assert_eq!(score.risk_score, 30);
    assert_eq!(score.recent_anomalies, 1);

    let err = app.analytics.detect_anomalies(Some(91)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputInvalid);
}

#[tokio::test]
async fn test_profiles_survive_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("profiles.db").display());

    let now = Utc::now();
    let fakes = Fakes {
        events: FakeEvents::with(vec![event(ALICE, "ListUsers", "iam.amazonaws.com", "10.0.0.1", now)]),
        ..Fakes::new(ScriptedLlm::texts(&[]))
    };
    let mut backends = fakes.backends();
    backends.store = Arc::new(SqliteStore::connect(&url).await.unwrap());
    let app = App::with_backends(AppConfig::default(), backends).unwrap();

    app.analytics.analyze_user(ALICE, Some(1)).await.unwrap();
    app.analytics.analyze_user(ALICE, Some(1)).await.unwrap();

    let reopened = cloudlens_rs::store::ProfileRepository::new(Arc::new(SqliteStore::connect(&url).await.unwrap()));
    let profile = reopened.get_profile(ALICE).await.unwrap();
    assert_eq!(profile.version, 2);
    assert_eq!(profile.events_count, 1);
    assert_eq!(reopened.results_for_user(ALICE, 10).await.len(), 2);
}

#[tokio::test]
async fn test_single_identity_scan() {
    let fakes = Fakes {
        events: FakeEvents::with(vec![event(ALICE, "ListBuckets", "s3.amazonaws.com", "203.0.113.9", Utc::now())]),
        ..Fakes::new(ScriptedLlm::texts(&[]))
    };
    let app = app_with(&fakes);

    // without a baseline nothing is reported
    assert!(app.analytics.scan_user(ALICE, 1).await.unwrap().is_empty());

    let mut profile = quiet_profile(ALICE);
    profile.service_usage.service_counts.insert("s3".to_string(), 3);
    profile.service_usage.frequent_apis = vec!["ListBuckets".to_string()];
    app.repository.save_profile(&profile).await.unwrap();

    let found = app.analytics.scan_user(ALICE, 1).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].anomaly_type, AnomalyType::NewIpAddress);
    assert_eq!(app.repository.list_anomalies(ALICE, None).await.len(), 1);
    assert!(fakes.alerts.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_overlapping_scans_keep_distinct_actions() {
    let at = Utc::now() - Duration::minutes(5);
    let fakes = Fakes {
        events: FakeEvents::with(vec![event(ALICE, "TerminateInstances", "ec2.amazonaws.com", "10.0.0.1", at)]),
        ..Fakes::new(ScriptedLlm::texts(&[]))
    };
    let app = app_with(&fakes);

    let mut profile = quiet_profile(ALICE);
    profile.service_usage.service_counts.insert("ec2".to_string(), 4);
    profile.service_usage.frequent_apis = vec!["TerminateInstances".to_string(), "StopInstances".to_string()];
    app.repository.save_profile(&profile).await.unwrap();

    let first = app.analytics.detect_anomalies(Some(1)).await.unwrap();
    assert_eq!(first.anomalies.len(), 1);

    // same second, same service, different action
    fakes
        .events
        .events
        .lock()
        .unwrap()
        .push(event(ALICE, "StopInstances", "ec2.amazonaws.com", "10.0.0.1", at));

    let second = app.analytics.detect_anomalies(Some(1)).await.unwrap();
    assert_eq!(second.duplicates_skipped, 1);
    assert_eq!(second.anomalies.len(), 1);
    assert_eq!(second.anomalies[0].action.as_deref(), Some("StopInstances"));
    assert_eq!(app.repository.list_anomalies(ALICE, None).await.len(), 2);
}
