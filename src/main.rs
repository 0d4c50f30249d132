use std::{sync::Arc, time::Duration};

use anyhow::{Context, Error, Result, anyhow};
use axum::Router;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notification_pipeline::{
    api::{self, GatewayState},
    clients::{
        caller::ResolvingCaller,
        circuit_breaker::CircuitBreakers,
        fcm::{FCM_SERVICE, FcmClient},
        health::{HealthChecker, HealthProbe, StoreProbe},
        mailer::SmtpMailer,
        rbmq::{RabbitMqClient, Topology},
        redis::RedisStatusStore,
        registry::RegistryClient,
        status::GatewayStatusClient,
        template::TemplateServiceClient,
        users::UserServiceClient,
    },
    config::{Config, ServiceRole},
    consumer::{
        ChannelHandler, ConsumerSettings, DeliveryConsumer, email::EmailHandler, push::PushHandler,
    },
    error::PipelineError,
    models::message::NotificationType,
    orchestrator::NotificationOrchestrator,
    shutdown::{ShutdownSequence, wait_for_signal},
};

type ServerHandle = JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(&config);

    let _ = rustls::crypto::ring::default_provider().install_default();

    info!(role = ?config.service_role, "Starting notification pipeline");

    match config.service_role {
        ServiceRole::Gateway => run_gateway(config).await,
        ServiceRole::Email => run_email_worker(config).await,
        ServiceRole::Push => run_push_worker(config).await,
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.is_development() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    }
}

fn resolving_caller(config: &Config, breakers: Arc<CircuitBreakers>) -> Result<ResolvingCaller> {
    let registry = RegistryClient::new(&config.discovery_url)?;
    let http_client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(ResolvingCaller::new(registry, breakers, http_client))
}

fn spawn_server(app: Router, port: u16, stop: CancellationToken) -> ServerHandle {
    tokio::spawn(api::run_api_server(app, port, stop))
}

/// Waits for a signal, or for the HTTP server to die on its own.
async fn wait_for_stop(server: &mut ServerHandle) -> bool {
    tokio::select! {
        _ = wait_for_signal() => true,
        joined = server => {
            match joined {
                Ok(Ok(())) => error!("HTTP server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
            false
        }
    }
}

async fn stop_server(server: ServerHandle, stop: CancellationToken) -> Result<(), PipelineError> {
    stop.cancel();
    server
        .await
        .map_err(|e| PipelineError::Internal(format!("HTTP server task panicked: {}", e)))?
        .map_err(|e| PipelineError::Internal(format!("HTTP server failed: {}", e)))
}

async fn run_gateway(config: Config) -> Result<()> {
    let rabbit = Arc::new(RabbitMqClient::connect(&config).await?);
    for channel in [NotificationType::Email, NotificationType::Push] {
        let topology =
            Topology::new(&config.notification_exchange, channel, config.queue_retry_delay_ms)
                .with_backoff(config.queue_retry_backoff_multiplier, config.queue_max_retries);
        rabbit.ensure_topology(&topology).await?;
    }

    let store = Arc::new(RedisStatusStore::connect(&config).await?);
    let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker_config()));
    let caller = resolving_caller(&config, breakers.clone())?;

    let users = Arc::new(UserServiceClient::new(
        caller,
        config.user_service_name.clone(),
        Duration::from_millis(config.user_cache_ttl_ms),
    ));
    let orchestrator = Arc::new(NotificationOrchestrator::new(users, store.clone(), rabbit.clone()));

    let probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(StoreProbe(store)) as Arc<dyn HealthProbe>,
        rabbit.clone() as Arc<dyn HealthProbe>,
    ];
    let health_checker = Arc::new(HealthChecker::new(probes, breakers));

    let app = api::gateway_routes(Arc::new(GatewayState {
        orchestrator,
        internal_secret: config.internal_service_secret.clone(),
    }))
    .merge(api::health_routes(health_checker));

    let http_stop = CancellationToken::new();
    let mut server = spawn_server(app, config.server_port, http_stop.clone());
    let server_alive = wait_for_stop(&mut server).await;

    let mut sequence = ShutdownSequence::new(config.shutdown_step_timeout());
    if server_alive {
        sequence = sequence.step("http server", stop_server(server, http_stop));
    }
    sequence
        .step("broker connection", async move { rabbit.close().await })
        .run()
        .await;

    info!("Gateway stopped");
    Ok(())
}

async fn run_email_worker(config: Config) -> Result<()> {
    let mailer = Arc::new(SmtpMailer::from_config(&config)?);

    let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker_config()));
    let caller = resolving_caller(&config, breakers.clone())?;
    let templates = Arc::new(TemplateServiceClient::new(
        caller.clone(),
        config.template_service_name.clone(),
    ));

    let from = mailer.sender().to_string();
    let handler = EmailHandler::new(templates, mailer, from);
    run_worker(config, handler, caller, breakers).await
}

async fn run_push_worker(config: Config) -> Result<()> {
    let project_id = config
        .fcm_project_id
        .clone()
        .ok_or_else(|| anyhow!("FCM_PROJECT_ID must be set for the push worker"))?;

    let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker_config()));
    let sender = Arc::new(FcmClient::new(&project_id, breakers.get(FCM_SERVICE)).await?);

    let caller = resolving_caller(&config, breakers.clone())?;
    let templates = Arc::new(TemplateServiceClient::new(
        caller.clone(),
        config.template_service_name.clone(),
    ));

    let handler = PushHandler::new(templates, sender);
    run_worker(config, handler, caller, breakers).await
}

async fn run_worker<H: ChannelHandler>(
    config: Config,
    handler: H,
    caller: ResolvingCaller,
    breakers: Arc<CircuitBreakers>,
) -> Result<()> {
    let rabbit = Arc::new(RabbitMqClient::connect(&config).await?);
    let reporter = Arc::new(GatewayStatusClient::new(
        caller,
        config.gateway_service_name.clone(),
        config.internal_service_secret.clone(),
    ));

    let topology = Topology::new(
        &config.notification_exchange,
        handler.channel(),
        config.queue_retry_delay_ms,
    )
    .with_backoff(config.queue_retry_backoff_multiplier, config.queue_max_retries);
    let settings = ConsumerSettings {
        max_retries: config.queue_max_retries,
        dependencies: config.delivery_dependencies(),
        grace_period: config.consumer_grace_period(),
    };
    let consumer = Arc::new(DeliveryConsumer::new(
        handler,
        topology,
        rabbit.clone(),
        reporter,
        settings,
    ));

    let intake = CancellationToken::new();
    let worker = tokio::spawn(consumer.supervise(rabbit.clone(), config.prefetch_count, intake.clone()));

    let probes: Vec<Arc<dyn HealthProbe>> = vec![rabbit.clone() as Arc<dyn HealthProbe>];
    let app = api::health_routes(Arc::new(HealthChecker::new(probes, breakers)));

    let http_stop = CancellationToken::new();
    let mut server = spawn_server(app, config.server_port, http_stop.clone());
    let server_alive = wait_for_stop(&mut server).await;

    let mut sequence = ShutdownSequence::new(config.shutdown_step_timeout())
        .step("consumer", async move {
            intake.cancel();
            worker
                .await
                .map_err(|e| PipelineError::Internal(format!("Consumer task panicked: {}", e)))?
        })
        .step("broker connection", async move { rabbit.close().await });
    if server_alive {
        sequence = sequence.step("http server", stop_server(server, http_stop));
    }
    sequence.run().await;

    info!("Worker stopped");
    Ok(())
}
