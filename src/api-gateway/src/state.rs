//! Shared application state
//!
//! Built once at startup and cloned into every handler and worker. All
//! mutable state lives in PostgreSQL and Redis; this struct is wiring.

use anyhow::Context;
use redis::aio::ConnectionManager;
use revback_backfill::{BackfillRunner, ProgressStore};
use revback_database::{connect_postgres, connect_redis, run_migrations, Database};
use revback_delivery::{AlertDispatcher, OutboundDelivery};
use revback_detection::{default_registry, DetectionEngine, ScanScheduler};
use revback_entitlements::EntitlementEngine;
use revback_ingestion::normalizers::google_play::GooglePlayClient;
use revback_ingestion::normalizers::GoogleNormalizer;
use revback_ingestion::{AppleWebhookProxy, IngestionPipeline};
use revback_queue::{
    CircuitBreaker, CircuitBreakerConfig, Queue, RateLimiter, RateLimiterConfig,
};
use revback_security::CredentialCipher;
use revback_shared::{queues, BillingSource, PlatformConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Handles to the six durable queues
#[derive(Clone)]
pub struct Queues {
    pub webhook_processing: Queue,
    pub alert_dispatch: Queue,
    pub webhook_delivery: Queue,
    pub scheduled_scans: Queue,
    pub data_retention: Queue,
    pub ingestion_backfill: Queue,
}

impl Queues {
    fn new(conn: ConnectionManager) -> Self {
        Self {
            webhook_processing: Queue::new(queues::WEBHOOK_PROCESSING, conn.clone()),
            alert_dispatch: Queue::new(queues::ALERT_DISPATCH, conn.clone()),
            webhook_delivery: Queue::new(queues::WEBHOOK_DELIVERY, conn.clone()),
            scheduled_scans: Queue::new(queues::SCHEDULED_SCANS, conn.clone()),
            data_retention: Queue::new(queues::DATA_RETENTION, conn.clone()),
            ingestion_backfill: Queue::new(queues::INGESTION_BACKFILL, conn),
        }
    }

    pub fn all(&self) -> Vec<&Queue> {
        vec![
            &self.webhook_processing,
            &self.alert_dispatch,
            &self.webhook_delivery,
            &self.scheduled_scans,
            &self.data_retention,
            &self.ingestion_backfill,
        ]
    }
}

/// Everything the handlers and workers need
#[derive(Clone)]
pub struct AppState {
    pub config: PlatformConfig,
    pub db: Database,
    pub redis: ConnectionManager,
    pub queues: Queues,
    pub cipher: CredentialCipher,
    pub http: reqwest::Client,
    pub pipeline: Arc<IngestionPipeline>,
    pub detection: DetectionEngine,
    pub scheduler: Arc<ScanScheduler>,
    pub backfill: BackfillRunner,
    pub dispatcher: AlertDispatcher,
    pub outbound: OutboundDelivery,
    pub apple_proxy: AppleWebhookProxy,
}

/// Token-bucket parameters per provider API
fn limiter_config(source: BillingSource) -> RateLimiterConfig {
    let (name, per_second) = match source {
        BillingSource::Stripe => ("stripe-api", 25),
        BillingSource::Apple => ("apple-api", 10),
        BillingSource::Google => ("google-api", 5),
        BillingSource::Recurly => ("recurly-api", 10),
        BillingSource::Braintree => ("braintree-api", 5),
    };
    RateLimiterConfig::new(name, per_second, per_second, Duration::from_secs(1))
}

impl AppState {
    pub async fn initialize(config: PlatformConfig) -> anyhow::Result<Self> {
        let pool = connect_postgres(&config.database)
            .await
            .context("connecting to PostgreSQL")?;
        run_migrations(&pool).await.context("running migrations")?;
        let db = Database::new(pool);

        let redis = connect_redis(&config.redis)
            .await
            .context("connecting to Redis")?;

        let cipher = CredentialCipher::from_config(&config.encryption)
            .context("loading credential encryption keys")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("revback/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;

        let queues = Queues::new(redis.clone());
        let repos = db.repos().clone();

        // one circuit breaker per external dependency, per process
        let breakers: Arc<HashMap<BillingSource, Arc<CircuitBreaker>>> = Arc::new(
            [
                BillingSource::Stripe,
                BillingSource::Apple,
                BillingSource::Google,
                BillingSource::Recurly,
                BillingSource::Braintree,
            ]
            .into_iter()
            .map(|s| {
                (
                    s,
                    Arc::new(CircuitBreaker::new(
                        format!("{s}-api"),
                        CircuitBreakerConfig::default(),
                    )),
                )
            })
            .collect(),
        );

        let redis_for_limiters = redis.clone();
        let limiters = move |source: BillingSource| {
            RateLimiter::new(limiter_config(source), redis_for_limiters.clone())
        };

        let registry = default_registry();
        let detection = DetectionEngine::new(
            repos.clone(),
            registry.clone(),
            queues.alert_dispatch.clone(),
        );
        let entitlements = EntitlementEngine::new(repos.clone());

        let google_enricher = Arc::new(GooglePlayClient::new(
            http.clone(),
            Some(limiters(BillingSource::Google)),
            Arc::clone(breakers.get(&BillingSource::Google).expect("seeded above")),
        ));
        let pipeline = Arc::new(
            IngestionPipeline::new(
                repos.clone(),
                entitlements,
                detection.clone(),
                cipher.clone(),
                http.clone(),
                Some(config.dashboard_url.clone()),
            )
            .with_normalizer(Arc::new(
                GoogleNormalizer::new(http.clone()).with_enricher(google_enricher),
            )),
        );

        let scheduler = Arc::new(ScanScheduler::new(
            repos.clone(),
            registry,
            queues.scheduled_scans.clone(),
            queues.data_retention.clone(),
        ));

        let progress = ProgressStore::new(redis.clone());
        let limiters_for_backfill = limiters.clone();
        let breakers_for_backfill = Arc::clone(&breakers);
        let backfill = BackfillRunner::new(
            repos.clone(),
            cipher.clone(),
            progress,
            Arc::clone(&pipeline),
            http.clone(),
            Arc::new(move |s| limiters_for_backfill(s)),
            Arc::new(move |s| {
                Arc::clone(
                    breakers_for_backfill
                        .get(&s)
                        .expect("breaker map covers every source"),
                )
            }),
        );

        let dispatcher = AlertDispatcher::new(
            repos.clone(),
            http.clone(),
            queues.webhook_delivery.clone(),
            config.smtp.clone(),
            config.dashboard_url.clone(),
        );
        let outbound = OutboundDelivery::new(repos.clone(), http.clone());
        let apple_proxy =
            AppleWebhookProxy::new(repos, http.clone(), config.env.is_production());

        Ok(Self {
            config,
            db,
            redis,
            queues,
            cipher,
            http,
            pipeline,
            detection,
            scheduler,
            backfill,
            dispatcher,
            outbound,
            apple_proxy,
        })
    }
}
