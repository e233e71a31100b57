use actix_web::{middleware::Logger, web, App, HttpServer};
use match_chat_service::{
    config, error, logging, routes,
    services::{LogNotificationDispatcher, NotificationDispatcher},
    state::AppState,
    store::{DocumentStore, MemoryStore},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const PRESENCE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn build_notifier(cfg: &config::Config) -> Result<Arc<dyn NotificationDispatcher>, error::AppError> {
    #[cfg(feature = "kafka")]
    if let Some(kafka) = &cfg.kafka {
        let producer = match_chat_service::services::notification::KafkaNotificationProducer::new(
            &kafka.brokers,
            &kafka.notification_topic,
        )?;
        return Ok(Arc::new(producer));
    }

    #[cfg(not(feature = "kafka"))]
    if cfg.kafka.is_some() {
        tracing::warn!("KAFKA_BROKERS set but built without the kafka feature; logging notifications");
    }

    Ok(Arc::new(LogNotificationDispatcher))
}

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let notifier = build_notifier(&cfg)?;
    let state = AppState::build(cfg.clone(), store, notifier);

    // Pending matches idle past the TTL expire in the background
    let discovery = state.discovery.clone();
    let match_ttl = cfg.match_ttl;
    let _expiry_sweeper: JoinHandle<()> = tokio::spawn(async move {
        let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = discovery.expire_stale_matches(match_ttl).await {
                tracing::warn!(error = %e, "match expiry sweep failed");
            }
        }
    });

    // Typing records past their TTL are dropped so presence stays bounded
    let presence = state.chats.presence().clone();
    let _presence_sweeper: JoinHandle<()> = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRESENCE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = presence.sweep_expired().await {
                tracing::warn!(error = %e, "presence sweep failed");
            }
        }
    });

    let bind_addr = cfg.bind_addr();
    tracing::info!(%bind_addr, "starting match-chat-service");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run: {e}")))
}
