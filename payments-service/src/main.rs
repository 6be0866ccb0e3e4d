use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use app_config::AppConfig;
use idempotent_consumer::{InboxProcessor, SqlxInboxRepository};
use payments_service::{handlers, inbox_handlers, kafka_consumer, metrics, repository};
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use repository::{AccountsRepository, PaymentsRepository, SqlxAccountsRepository, SqlxPaymentsRepository};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transactional_outbox::{metrics::OutboxMetrics, KafkaOutboxPublisher, OutboxProcessor, SqlxOutboxRepository};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_usage_and_exit() -> ! {
    eprintln!("usage: payments-service [migrate]");
    std::process::exit(2);
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None => run_service().await,
        Some("migrate") => run_migrate().await,
        Some("--help") => print_usage_and_exit(),
        Some(_) => print_usage_and_exit(),
    }
}

async fn run_migrate() -> std::io::Result<()> {
    let config = AppConfig::load().expect("failed to load configuration");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect(&config.db.url())
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    tracing::info!("migrations applied");
    Ok(())
}

async fn run_service() -> std::io::Result<()> {
    let config = Arc::new(AppConfig::load().expect("failed to load configuration"));

    let pool = db_pool::create_pool(db_pool::DbConfig {
        service_name: "payments-service".to_string(),
        database_url: config.db.url(),
        max_connections: 10,
        min_connections: 3,
        connect_timeout_secs: 5,
        acquire_timeout_secs: 10,
        idle_timeout_secs: 600,
        max_lifetime_secs: 1800,
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?;

    let payments_repo: Arc<dyn PaymentsRepository> = Arc::new(SqlxPaymentsRepository::new(pool.clone()));
    let accounts_repo: Arc<dyn AccountsRepository> = Arc::new(SqlxAccountsRepository::new(pool.clone()));
    let outbox_repo = Arc::new(SqlxOutboxRepository::new(pool.clone()));
    let inbox_repo = Arc::new(SqlxInboxRepository::new(pool.clone()));

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", config.kafka.brokers_csv())
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("max.in.flight.requests.per.connection", "5")
        .create()
        .expect("failed to create Kafka producer");
    let publisher = Arc::new(KafkaOutboxPublisher::new(producer, "nova".to_string()));

    let outbox_processor = Arc::new(OutboxProcessor::new_with_metrics(
        Arc::clone(&outbox_repo),
        publisher,
        OutboxMetrics::new("payments-service"),
        config.kafka.publisher.batch_size,
        Duration::from_millis(config.kafka.publisher.interval_ms),
        config.kafka.publisher.max_retries,
    ));

    let mut inbox_processor = InboxProcessor::new(
        Arc::clone(&inbox_repo),
        50,
        Duration::from_secs(1),
        Duration::from_secs(120),
    )
    .with_metrics(idempotent_consumer::metrics::InboxMetrics::new("payments-service"));

    inbox_handlers::register(
        &mut inbox_processor,
        pool.clone(),
        Arc::clone(&payments_repo),
        Arc::clone(&accounts_repo),
        Arc::clone(&outbox_repo),
        config.kafka.publisher.max_retries,
    );
    let inbox_processor = Arc::new(inbox_processor);

    let cancellation = CancellationToken::new();

    let outbox_task = tokio::spawn({
        let outbox_processor = Arc::clone(&outbox_processor);
        async move {
            if let Err(e) = outbox_processor.start().await {
                tracing::error!(error = %e, "outbox processor exited");
            }
        }
    });

    let inbox_task = tokio::spawn({
        let inbox_processor = Arc::clone(&inbox_processor);
        async move { inbox_processor.start().await }
    });

    let kafka_task = tokio::spawn({
        let brokers = config.kafka.brokers_csv();
        let group_id = config.kafka.consumer.group_id.clone();
        let processor = Arc::clone(&inbox_processor);
        let cancellation = cancellation.clone();
        async move {
            if let Err(e) = kafka_consumer::run(&brokers, &group_id, processor, cancellation).await {
                tracing::error!(error = %e, "Kafka consumer exited");
            }
        }
    });

    let app_state = web::Data::new(handlers::AppState {
        pool: pool.clone(),
        payments_repo: Arc::clone(&payments_repo),
        accounts_repo: Arc::clone(&accounts_repo),
        outbox_repo: Arc::clone(&outbox_repo),
    });

    let port = config.server.port;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .service(
                web::scope("/payments-api")
                    .route("/info", web::get().to(handlers::payments::info))
                    .route("/payments/{id}", web::get().to(handlers::payments::get_payment))
                    .route(
                        "/payments/by-order/{order_id}",
                        web::get().to(handlers::payments::get_payment_by_order),
                    )
                    .route("/accounts", web::post().to(handlers::accounts::create_account))
                    .route(
                        "/accounts/{user_id}/topup",
                        web::post().to(handlers::accounts::topup_account),
                    )
                    .route("/accounts/{user_id}", web::get().to(handlers::accounts::get_account))
                    .configure(handlers::docs::configure),
            )
    })
    .bind(("0.0.0.0", port))?
    .shutdown_timeout(10)
    .run();

    let server_handle = server.handle();
    let http_task = tokio::spawn(server);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining background loops");

    cancellation.cancel();
    inbox_task.abort();
    outbox_task.abort();
    let _ = kafka_task.await;

    server_handle.stop(true).await;
    let _ = http_task.await;

    pool.close().await;
    tracing::info!("payments-service stopped");
    Ok(())
}
