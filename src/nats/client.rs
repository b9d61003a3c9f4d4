use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Wildcard subject devices publish readings under (one token per fruit)
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Optional queue group, so several instances can split the load
    #[serde(default)]
    pub queue_group: Option<String>,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_subject() -> String {
    "sigma.sensors.>".to_string()
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            subject: default_subject(),
            queue_group: None,
        }
    }
}

/// Connected NATS client
pub struct NatsClient {
    client: async_nats::Client,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::ConnectOptions::new()
            .name("sigma")
            .connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS");
        Ok(Self { client, config })
    }

    /// Subscribe to the configured reading subject
    pub async fn subscribe(&self) -> Result<async_nats::Subscriber> {
        let subject = self.config.subject.clone();

        let subscriber = match &self.config.queue_group {
            Some(group) => {
                info!(subject = %subject, queue_group = %group, "Subscribing to readings");
                self.client
                    .queue_subscribe(subject.clone(), group.clone())
                    .await
            }
            None => {
                info!(subject = %subject, "Subscribing to readings");
                self.client.subscribe(subject.clone()).await
            }
        }
        .with_context(|| format!("Failed to subscribe to '{}'", subject))?;

        Ok(subscriber)
    }
}
