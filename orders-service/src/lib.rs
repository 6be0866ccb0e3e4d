pub mod domain;
pub mod events;
pub mod handlers;
pub mod inbox_handlers;
pub mod kafka_consumer;
pub mod metrics;
pub mod push;
pub mod repository;
