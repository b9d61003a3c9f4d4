// NATS transport: device readings in

mod client;
mod subscriber;

pub use client::{NatsClient, NatsConfig};
pub use subscriber::run_subscriber;
