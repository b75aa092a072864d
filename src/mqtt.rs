use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{MqttOptions, Outgoing, QoS};
use tokio::sync::Notify;

use crate::config;
use crate::controller::{EventSink, Link};
use crate::error::Result;
use crate::messages::{ScanEvent, Visibility};

/// Broker connection shared between the controller (publishing, connection
/// checks) and the task polling the rumqttc event loop.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
    connected: Arc<AtomicBool>,
    reconnect: Arc<Notify>,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"proximity-rs".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config.topic_path.clone().unwrap_or("proximity".to_string()),
                connected: Arc::new(AtomicBool::new(false)),
                reconnect: Arc::new(Notify::new()),
            },
            eventloop,
        )
    }

    /// Drive the broker connection until the client disconnects. After a
    /// connection error the loop waits for a reconnect request or
    /// `retry_delay`, whichever comes first, before polling again.
    pub async fn event_loop(&self, eventloop: &mut rumqttc::EventLoop, retry_delay: Duration) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => {
                    if !self.handle_event(&notification) {
                        break;
                    }
                }
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    self.connected.store(false, Ordering::Relaxed);
                    self.wait_for_retry(retry_delay).await;
                }
            }
        }
    }

    /// Track connection state. Returns false once the client itself has
    /// disconnected.
    fn handle_event(&self, notification: &rumqttc::Event) -> bool {
        match notification {
            rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                debug!("Connection acknowledged");
                self.connected.store(true, Ordering::Relaxed);
            }
            rumqttc::Event::Incoming(rumqttc::Packet::PubAck(ack)) => {
                debug!("Publish {} acknowledged", ack.pkid);
            }
            rumqttc::Event::Incoming(rumqttc::Packet::Disconnect) => {
                debug!("Broker closed the connection");
                self.connected.store(false, Ordering::Relaxed);
            }
            rumqttc::Event::Outgoing(Outgoing::Disconnect) => {
                debug!("Client disconnected");
                self.connected.store(false, Ordering::Relaxed);
                return false;
            }
            _ => {}
        }
        true
    }

    async fn wait_for_retry(&self, retry_delay: Duration) {
        tokio::select! {
            _ = self.reconnect.notified() => debug!("Reconnect requested"),
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }

    pub async fn disconnect(&self) -> Result<()> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await?;
        Ok(())
    }

    fn topic(&self, event: &ScanEvent) -> String {
        format!("{}/{}/{}", self.topic_path, self.publisher_id, event.topic())
    }
}

#[async_trait]
impl EventSink for MqttClient {
    async fn publish(&mut self, event: &ScanEvent) -> Result<()> {
        let retain = match event.visibility() {
            Visibility::Private => false,
        };
        let topic = self.topic(event);
        info!("Publishing {:?} on {}", event, topic);
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, event.payload())
            .await?;
        Ok(())
    }
}

impl Link for MqttClient {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn connect(&mut self) {
        info!("Requesting broker reconnect");
        self.reconnect.notify_one();
    }
}
