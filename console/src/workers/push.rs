//! Push channel worker

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::errors::ConsoleError;
use crate::push::client::{PushChannelClient, PushHandle};
use crate::push::fsm::ReconnectPolicy;
use crate::push::topics::Topics;
use crate::push::transport::{BrokerAddress, MqttConnector, PushConnector};
use crate::sync::feed::DeploymentFeed;

/// Push worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Broker endpoint
    pub broker_address: Option<BrokerAddress>,

    /// Topic namespace
    pub topic_prefix: Option<String>,

    /// Client id prefix; a random suffix is appended per session
    pub client_id_prefix: String,

    /// Backoff between reconnection attempts
    pub reconnect: ReconnectPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            broker_address: None,
            topic_prefix: None,
            client_id_prefix: "deploy-console".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Build the MQTT connector for these options
pub fn connector(
    options: &Options,
    token: Option<secrecy::SecretString>,
) -> Result<Arc<dyn PushConnector>, ConsoleError> {
    let address = options.broker_address.clone().ok_or_else(|| {
        ConsoleError::ConfigError("Push broker address not configured".to_string())
    })?;
    Ok(Arc::new(MqttConnector::new(
        address,
        &options.client_id_prefix,
        token,
    )))
}

/// Create a client bound to the deployment topic
pub fn client(
    options: &Options,
    connector: Arc<dyn PushConnector>,
) -> (PushChannelClient, PushHandle) {
    let topic = Topics::deployments(options.topic_prefix.as_deref());
    PushChannelClient::new(connector, &topic, options.reconnect.clone())
}

/// Run the push worker until shutdown
pub async fn run<S, F>(
    client: PushChannelClient,
    feed: Arc<DeploymentFeed>,
    sleep_fn: S,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Push worker starting...");
    client.run(feed.as_ref(), sleep_fn, shutdown_signal).await;
}
