// Freshness rules and classification
pub mod rules;

// Reading model and wire decoding
pub mod reading;

// Durable reading history
pub mod store;

// Live viewer fan-out
pub mod hub;

// Per-fruit ingestion pipeline
pub mod ingest;

// HTTP and WebSocket APIs
pub mod api;

// NATS client integration
pub mod nats;

// Configuration
pub mod config;
