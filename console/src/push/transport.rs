//! Push transport: MQTT carried over a WebSocket

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use rustls::ClientConfig;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::ConsoleError;

/// A message received on a subscribed topic
#[derive(Debug, Clone)]
pub struct PushFrame {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// One live connection to the broker
#[async_trait]
pub trait PushSession: Send {
    /// Subscribe to a topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), ConsoleError>;

    /// Wait for the next event. `Ok(None)` for protocol traffic that carries no
    /// message; an error means the connection is gone.
    async fn next_frame(&mut self) -> Result<Option<PushFrame>, ConsoleError>;

    /// Close the connection
    async fn close(&mut self);
}

/// Opens broker sessions
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Connect and complete the protocol handshake
    async fn connect(&self) -> Result<Box<dyn PushSession>, ConsoleError>;
}

/// Broker address
#[derive(Debug, Clone)]
pub struct BrokerAddress {
    /// `ws://` or `wss://` endpoint
    pub url: Url,

    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and the scheme is `wss`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl BrokerAddress {
    /// Parse and validate a WebSocket broker URL
    pub fn parse(url: &str, ca_cert_path: Option<String>) -> Result<Self, ConsoleError> {
        let url = Url::parse(url).map_err(|e| ConsoleError::ConfigError(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self { url, ca_cert_path }),
            other => Err(ConsoleError::ConfigError(format!(
                "Unsupported push channel scheme: {}",
                other
            ))),
        }
    }

    /// Derive the broker endpoint from the backend URL: same host, `ws`/`wss`
    /// scheme, `/mqtt` path
    pub fn from_backend_url(backend_url: &str, ca_cert_path: Option<String>) -> Result<Self, ConsoleError> {
        let mut url =
            Url::parse(backend_url).map_err(|e| ConsoleError::ConfigError(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            _ => return Err(ConsoleError::ConfigError("Invalid backend URL scheme".to_string())),
        };

        url.set_scheme(scheme)
            .map_err(|_| ConsoleError::ConfigError("Failed to set scheme".to_string()))?;
        url.set_path("/mqtt");
        url.set_query(None);

        Ok(Self { url, ca_cert_path })
    }

    pub fn use_tls(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

/// MQTT-over-WebSocket connector
pub struct MqttConnector {
    address: BrokerAddress,
    client_id_prefix: String,
    token: Option<SecretString>,
    keep_alive: Duration,
}

impl MqttConnector {
    pub fn new(address: BrokerAddress, client_id_prefix: &str, token: Option<SecretString>) -> Self {
        Self {
            address,
            client_id_prefix: client_id_prefix.to_string(),
            token,
            keep_alive: Duration::from_secs(30),
        }
    }

    fn options(&self) -> Result<MqttOptions, ConsoleError> {
        // fresh client id per session so a half-closed predecessor cannot evict us
        let client_id = format!("{}-{}", self.client_id_prefix, uuid::Uuid::new_v4().simple());
        let port = self.address.url.port_or_known_default().unwrap_or(80);

        let mut options = MqttOptions::new(client_id, self.address.url.as_str(), port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some(token) = &self.token {
            options.set_credentials("console", token.expose_secret());
        }

        if self.address.use_tls() {
            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = self.address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    ConsoleError::PushError(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::wss_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        } else {
            options.set_transport(Transport::Ws);
        }

        Ok(options)
    }
}

#[async_trait]
impl PushConnector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn PushSession>, ConsoleError> {
        let options = self.options()?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        debug!("Connecting to push broker: {}", self.address.url);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(ConsoleError::PushError(format!(
                            "Broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    info!("Push broker connected");
                    break;
                }
                Ok(_) => continue,
                Err(e) => return Err(ConsoleError::PushError(e.to_string())),
            }
        }

        Ok(Box::new(MqttSession { client, eventloop }))
    }
}

/// Live MQTT session
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
}

#[async_trait]
impl PushSession for MqttSession {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ConsoleError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| ConsoleError::PushError(e.to_string()))?;
        info!("Subscribed to: {}", topic);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<PushFrame>, ConsoleError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on topic: {}", publish.topic);
                Ok(Some(PushFrame {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                }))
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(None)
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Push broker poll error: {}", e);
                Err(ConsoleError::PushError(e.to_string()))
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("Push disconnect request failed: {}", e);
            return;
        }

        // flush the DISCONNECT packet; the socket is dropped with the session either way
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(1), flush).await;
        info!("Push broker disconnected");
    }
}
