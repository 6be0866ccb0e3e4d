use std::sync::Arc;

use idempotent_consumer::InboxProcessor;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumes `payments-events` and hands each message to the inbox intake
/// path before acknowledging it. Manual commit, one message at a time: the
/// offset only advances once [`InboxProcessor::intake`] has durably
/// recorded the event, so a crash between receipt and commit simply
/// redelivers the message on restart.
pub async fn run(
    brokers: &str,
    group_id: &str,
    processor: Arc<InboxProcessor<idempotent_consumer::SqlxInboxRepository>>,
    cancellation: CancellationToken,
) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", group_id)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .set("session.timeout.ms", "10000")
        .set("heartbeat.interval.ms", "3000")
        .create()?;

    consumer.subscribe(&["payments-events"])?;
    info!(topic = "payments-events", %group_id, "subscribed to Kafka topic");

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => {
                info!("Kafka consumer shutting down");
                return Ok(());
            }
            msg = consumer.recv() => {
                let message = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "Kafka consumer error");
                        continue;
                    }
                };

                let Some(payload) = message.payload() else {
                    warn!("received message with empty payload, skipping");
                    continue;
                };
                let payload: serde_json::Value = match serde_json::from_slice(payload) {
                    Ok(v) => v,
                    Err(e) => {
                        error!(error = %e, "failed to parse message payload as JSON");
                        continue;
                    }
                };

                let mut event_type = None;
                let mut event_id = None;
                if let Some(headers) = message.headers() {
                    for header in headers.iter() {
                        match (header.key, header.value) {
                            ("event_type", Some(v)) => {
                                event_type = std::str::from_utf8(v).ok().map(str::to_string);
                            }
                            ("event_id", Some(v)) => {
                                event_id = std::str::from_utf8(v).ok().map(str::to_string);
                            }
                            _ => {}
                        }
                    }
                }

                let (Some(event_type), Some(event_id)) = (event_type, event_id) else {
                    error!("message missing event_type/event_id headers, skipping");
                    continue;
                };

                match processor.intake(&event_id, &event_type, &payload, 3).await {
                    Ok(_) => {
                        if let Err(e) = consumer.commit_consumer_state(CommitMode::Async) {
                            warn!(error = %e, "failed to commit Kafka offset");
                        } else {
                            debug!(%event_id, %event_type, "message recorded in inbox, offset committed");
                        }
                    }
                    Err(e) => {
                        error!(error = %e, %event_id, %event_type, "inbox intake failed, not committing offset");
                    }
                }
            }
        }
    }
}

