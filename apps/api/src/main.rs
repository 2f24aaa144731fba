use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    appointment_dispatcher, AppointmentOrchestrator, AppointmentState, HttpDirectoryClient,
    PostgrestAppointmentStore, PostgrestNotificationStore, StoreBookingSource,
};
use messaging_cell::{EventConsumer, EventPublisher, MessageBroker, RabbitMqBroker, Topology};
use resilience_cell::BreakerRegistry;
use scheduling_cell::{
    AvailabilityCache, AvailabilityService, InMemoryAvailabilityCache, PostgrestScheduleStore,
    RedisAvailabilityCache, SchedulingState,
};
use shared_config::AppConfig;

/// Redis when configured and reachable, otherwise a per-process cache
/// swept once per TTL.
async fn availability_cache(config: &AppConfig, shutdown: watch::Receiver<bool>) -> Arc<dyn AvailabilityCache> {
    if let Some(url) = &config.redis_url {
        match RedisAvailabilityCache::new(url).await {
            Ok(cache) => return Arc::new(cache),
            Err(e) => warn!("Redis unavailable, using in-memory availability cache: {}", e),
        }
    }
    let cache = Arc::new(InMemoryAvailabilityCache::new());
    let sweep_every = Duration::from_secs(config.availability_cache_ttl_seconds.max(1));
    cache.spawn_cleanup(sweep_every, shutdown);
    cache
}

async fn shutdown_signal(shutdown: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    let _ = shutdown.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting appointment service");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Resilience and messaging
    let breakers = Arc::new(BreakerRegistry::from_app_config(&config));
    let broker = Arc::new(RabbitMqBroker::from_app_config(&config));
    info!("Connecting to RabbitMQ at {}", broker.connection_url_redacted());
    let topology = Topology::appointment_service();
    broker
        .declare(&topology)
        .await
        .context("declaring RabbitMQ topology")?;
    let broker: Arc<dyn MessageBroker> = broker;
    let publisher = EventPublisher::new(Arc::clone(&broker), config.service_name.clone());

    // Stores, directories and cache
    let appointments = Arc::new(PostgrestAppointmentStore::new(&config));
    let cache = availability_cache(&config, shutdown_rx.clone()).await;
    let providers = Arc::new(HttpDirectoryClient::medecins(&config, &breakers).await);
    let patients = Arc::new(HttpDirectoryClient::patients(&config, &breakers).await);

    let orchestrator = Arc::new(AppointmentOrchestrator::new(
        appointments.clone(),
        Arc::new(PostgrestNotificationStore::new(&config)),
        providers,
        patients,
        publisher.clone(),
        Arc::clone(&cache),
    ));

    let availability = Arc::new(AvailabilityService::new(
        Arc::new(PostgrestScheduleStore::new(&config)),
        Arc::new(StoreBookingSource::new(appointments)),
        cache,
        Duration::from_secs(config.availability_cache_ttl_seconds),
    ));

    // Event consumers
    let consumer = EventConsumer::new(
        Arc::clone(&broker),
        Arc::new(appointment_dispatcher(Arc::clone(&orchestrator))),
    );
    let consumers = consumer
        .start(&topology.queue_names(), shutdown_rx.clone())
        .await
        .context("starting event consumers")?;
    info!("Consuming {} queues", consumers.len());

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(
        Arc::new(AppointmentState { config: Arc::clone(&config), orchestrator }),
        Arc::new(SchedulingState { config: Arc::clone(&config), availability, publisher }),
        breakers,
    )
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new()
                .level(Level::INFO))
            .on_response(trace::DefaultOnResponse::new()
                .level(Level::INFO)),
    )
    .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let mut server_shutdown = shutdown_rx;
    tokio::spawn(shutdown_signal(shutdown_tx));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("serving HTTP")?;

    for handle in consumers {
        if let Err(e) = handle.await {
            error!("Consumer task failed: {}", e);
        }
    }
    info!("Appointment service stopped");

    Ok(())
}
