//! Component wiring
//!
//! Builds every component once from [`AppConfig`] and hands them out
//! explicitly. [`Backends`] is the seam for substituting external services.

use crate::alerts::{AlertChannel, LogAlertChannel};
use crate::analytics::{
    AnomalyScanner, BehaviorProfiler, DetectorRegistry, EventFetcher, EventLookupApi, GeoResolver,
    IdentityPolicyApi, ScannerSettings, SecurityAnalytics, SensitiveActions, UnknownGeoResolver,
};
use crate::aws::{AthenaClient, AwsClient, CloudTrailClient, CloudWatchLogsClient, IamClient, SnsAlertChannel};
use crate::config::{AppConfig, StoreBackend};
use crate::error::Result;
use crate::gateway::{InsightsApi, LogQueryGateway, WarehouseApi};
use crate::llm::LlmClient;
use crate::mcp::{HttpToolTransport, ToolTransport};
use crate::nlq::ChatPipeline;
use crate::orchestrator::{Orchestrator, TransportFactory};
use crate::server::AppState;
use crate::store::{KeyValueStore, MemoryStore, ProfileRepository, SqliteStore};
use std::sync::Arc;
use tracing::info;

/// External collaborators
#[derive(Clone)]
pub struct Backends {
    pub warehouse: Arc<dyn WarehouseApi>,
    pub insights: Arc<dyn InsightsApi>,
    pub events: Arc<dyn EventLookupApi>,
    pub policies: Option<Arc<dyn IdentityPolicyApi>>,
    pub alerts: Arc<dyn AlertChannel>,
    pub geo: Arc<dyn GeoResolver>,
    pub store: Arc<dyn KeyValueStore>,
    pub llm: LlmClient,
    pub tools: Option<TransportFactory>,
}

impl Backends {
    /// AWS-backed services as configured
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let aws = AwsClient::from_config(&config.aws)?;

        let alerts: Arc<dyn AlertChannel> = match &config.analytics.alert_topic_arn {
            Some(_) => Arc::new(SnsAlertChannel::new(aws.clone())),
            None => Arc::new(LogAlertChannel),
        };

        let tools = HttpToolTransport::from_config(&config.mcp)?.map(|template| {
            let template = Arc::new(template);
            let factory: TransportFactory =
                Arc::new(move || Arc::new(template.fresh()) as Arc<dyn ToolTransport>);
            factory
        });

        Ok(Self {
            warehouse: Arc::new(AthenaClient::new(aws.clone())),
            insights: Arc::new(CloudWatchLogsClient::new(aws.clone())),
            events: Arc::new(CloudTrailClient::new(aws.clone())),
            policies: Some(Arc::new(IamClient::new(aws.clone()))),
            alerts,
            geo: Arc::new(UnknownGeoResolver),
            store: open_store(config).await?,
            llm: LlmClient::new(config.llm.clone(), Some(&aws))?,
            tools,
        })
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    Ok(match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Sqlite => {
            info!(url = %config.store.sqlite_url, "opening sqlite profile store");
            Arc::new(SqliteStore::connect(&config.store.sqlite_url).await?)
        }
    })
}

/// Fully wired application
pub struct App {
    pub config: AppConfig,
    pub analytics: Arc<SecurityAnalytics>,
    pub pipeline: Arc<ChatPipeline>,
    pub gateway: Arc<LogQueryGateway>,
    pub repository: ProfileRepository,
}

impl App {
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let backends = Backends::from_config(&config).await?;
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: AppConfig, backends: Backends) -> Result<Self> {
        let repository = ProfileRepository::new(backends.store.clone());
        let analytics_config = &config.analytics;

        let fetcher = Arc::new(EventFetcher::new(
            backends.events.clone(),
            analytics_config.page_delay(),
            analytics_config.page_size,
        ));
        let profiler = BehaviorProfiler::new(
            fetcher.clone(),
            repository.clone(),
            backends.policies.clone(),
            backends.geo.clone(),
        );
        let sensitive = SensitiveActions::from_override(analytics_config.sensitive_actions.as_deref());
        let scanner = AnomalyScanner::new(
            DetectorRegistry::standard(sensitive),
            repository.clone(),
            backends.alerts.clone(),
            ScannerSettings {
                alert_threshold: analytics_config.alert_threshold,
                alert_topic: analytics_config.alert_topic_arn.clone(),
                dedupe: analytics_config.dedupe_anomalies,
            },
        );
        let analytics = Arc::new(SecurityAnalytics::new(
            fetcher,
            profiler,
            scanner,
            repository.clone(),
            analytics_config.clone(),
        ));

        let gateway = Arc::new(LogQueryGateway::new(
            backends.warehouse.clone(),
            backends.insights.clone(),
            config.warehouse.clone(),
            config.insights.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            backends.llm.clone(),
            config.orchestrator.clone(),
            backends.tools.clone(),
        )?);
        let pipeline = Arc::new(ChatPipeline::new(
            backends.llm.clone(),
            gateway.clone(),
            config.catalog.clone(),
            Some(orchestrator),
        ));

        Ok(Self {
            config,
            analytics,
            pipeline,
            gateway,
            repository,
        })
    }

    pub fn state(&self) -> AppState {
        AppState {
            analytics: self.analytics.clone(),
            pipeline: self.pipeline.clone(),
            gateway: self.gateway.clone(),
        }
    }
}
