//! MQTT device inventory
//!
//! Tanks are announced on the local bus:
//! - `{prefix}/tanks/registration@v1` once per new tank
//! - `{prefix}/tanks/state@v1` after every update
//! - `{prefix}/refresh@v1` (subscribed) starts a cycle right away

use crate::config::AgentConfig;
use crate::registry::{DeviceSink, TankId, TankState, TankView};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub registration: String,
    pub state: String,
    pub refresh: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            registration: format!("{}/tanks/registration@v1", prefix),
            state: format!("{}/tanks/state@v1", prefix),
            refresh: format!("{}/refresh@v1", prefix),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TankEvent {
    Registered,
    Updated,
}

/// Tank message (matches tanks.registration@v1 / tanks.state@v1 contracts)
#[derive(Debug, Serialize)]
pub struct TankMessage<'a> {
    pub event: TankEvent,
    pub agent_id: &'a str,
    pub tank: TankView,
    pub timestamp: DateTime<Utc>,
}

impl<'a> TankMessage<'a> {
    pub fn new(event: TankEvent, agent_id: &'a str, state: &TankState) -> Self {
        Self {
            event,
            agent_id,
            tank: state.view(),
            timestamp: Utc::now(),
        }
    }
}

pub struct MqttInventory {
    client: AsyncClient,
    topics: Topics,
    agent_id: String,
}

impl MqttInventory {
    /// Build the client and spawn its event loop. The returned receiver yields
    /// one item per refresh request seen on the bus.
    pub fn connect(config: &AgentConfig) -> (Self, mpsc::Receiver<()>) {
        let topics = Topics::new(&config.mqtt.topic_prefix);

        let mut mqtt_options = MqttOptions::new(
            config.mqtt_client_id(),
            config.mqtt.broker_host.clone(),
            config.mqtt.broker_port,
        );
        mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs as u64));
        mqtt_options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 32);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let loop_client = client.clone();
        let refresh_topic = topics.refresh.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("Connected to MQTT broker, listening on {}", refresh_topic);
                        // Clean session: subscribe again on every (re)connect
                        if let Err(e) = loop_client.try_subscribe(refresh_topic.as_str(), QoS::AtLeastOnce) {
                            error!("Failed to subscribe to {}: {}", refresh_topic, e);
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == refresh_topic => {
                        if trigger_tx.try_send(()).is_err() {
                            debug!("Refresh already pending, ignoring request");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        let inventory = Self {
            client,
            topics,
            agent_id: config.agent.agent_id.clone(),
        };
        (inventory, trigger_rx)
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    fn publish(&self, topic: &str, event: TankEvent, state: &TankState) {
        let message = TankMessage::new(event, &self.agent_id, state);
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize tank {} message: {}", state.tank_id(), e);
                return;
            }
        };

        match self.client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
            Ok(()) => debug!("Published tank {} to {}", state.tank_id(), topic),
            Err(e) => warn!("Failed to publish tank {} to {}: {}", state.tank_id(), topic, e),
        }
    }
}

impl DeviceSink for MqttInventory {
    fn register(&self, _tank_id: TankId, initial: &TankState) {
        self.publish(&self.topics.registration, TankEvent::Registered, initial);
    }

    fn notify_updated(&self, _tank_id: TankId, state: &TankState) {
        self.publish(&self.topics.state, TankEvent::Updated, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Level, Quantity, TankReading};

    #[test]
    fn test_topics_from_prefix() {
        let topics = Topics::new("symbion/ilevel/");
        assert_eq!(topics.registration, "symbion/ilevel/tanks/registration@v1");
        assert_eq!(topics.state, "symbion/ilevel/tanks/state@v1");
        assert_eq!(topics.refresh, "symbion/ilevel/refresh@v1");
    }

    #[test]
    fn test_tank_message_shape() {
        let reading = TankReading {
            tank_id: 1745,
            description: "Tank 205201".to_string(),
            gallons: Quantity::Text("322".to_string()),
            capacity: Quantity::Text("330".to_string()),
            level: Level::new(98).unwrap(),
            inches: 44.0,
        };
        let state = TankState::from_reading(&reading, Utc::now());

        let message = TankMessage::new(TankEvent::Registered, "agent-1", &state);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["event"], "registered");
        assert_eq!(json["agent_id"], "agent-1");
        assert_eq!(json["tank"]["entity"], "ilevel 1745");
        assert_eq!(json["tank"]["level"], 98);
        assert_eq!(json["tank"]["unit"], "%");
        assert_eq!(json["tank"]["icon"], "mdi:gauge-full");
        assert_eq!(json["tank"]["gallons"], "322");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_publish_without_broker_does_not_panic() {
        let mut config = AgentConfig::default();
        config.mqtt.broker_port = 1;
        let (inventory, _triggers) = MqttInventory::connect(&config);

        let reading = TankReading {
            tank_id: 7,
            description: "Garage".to_string(),
            gallons: Quantity::Text("10".to_string()),
            capacity: Quantity::Text("275".to_string()),
            level: Level::new(4).unwrap(),
            inches: 2.5,
        };
        let state = TankState::from_reading(&reading, Utc::now());
        inventory.register(7, &state);
        inventory.notify_updated(7, &state);
    }
}
