pub mod config;
pub mod cycle;
pub mod handlers;
pub mod kafka_producer;
