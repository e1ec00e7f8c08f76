//! MQTT client for receiving LPR observations and operator commands

use crate::domain::types::{DetectorMessage, InputEvent, PlateId, PlateObservation, WireCommand};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Start the MQTT client and send parsed events to the channel
///
/// Subscribes to the observations topic (camera batches) and the commands
/// topic (operator actions). Events are sent via try_send to avoid blocking
/// the MQTT eventloop; dropped events are counted in metrics and logged
/// (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    event_tx: mpsc::Sender<InputEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("parking-gateway-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.observations_topic(), QoS::AtMostOnce).await?;
    client.subscribe(config.commands_topic(), QoS::AtLeastOnce).await?;

    info!(
        observations = %config.observations_topic(),
        commands = %config.commands_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "MQTT client subscribed"
    );

    let observations_topic = config.observations_topic().to_string();
    let commands_topic = config.commands_topic().to_string();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            // Check for shutdown signal
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            // Process MQTT events
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let received_at = Instant::now();
                        let topic = &publish.topic;
                        let payload = std::str::from_utf8(&publish.payload);

                        let Ok(json_str) = payload else {
                            warn!(topic = %topic, "Invalid UTF-8 in MQTT payload");
                            continue;
                        };

                        let events = if topic == &observations_topic {
                            parse_detector_message(json_str, received_at)
                        } else if topic == &commands_topic {
                            parse_command(json_str, received_at).into_iter().collect()
                        } else {
                            Vec::new()
                        };

                        for event in events {
                            debug!(kind = %event.kind(), "parsed_event");
                            if let Err(e) = event_tx.try_send(event) {
                                match e {
                                    TrySendError::Full(_) => {
                                        metrics.record_ingest_event_dropped();
                                        if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                            warn!("ingest_event_dropped: channel full");
                                            last_drop_warn = Instant::now();
                                        }
                                    }
                                    TrySendError::Closed(_) => {
                                        warn!("Event channel closed");
                                        return Ok(());
                                    }
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse a camera observation batch into events
///
/// Malformed batches and blank plates are skipped with a debug log; an
/// unreadable camera message must never take the pipeline down.
pub fn parse_detector_message(json_str: &str, received_at: Instant) -> Vec<InputEvent> {
    let message: DetectorMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "Failed to parse detector message");
            return Vec::new();
        }
    };

    let now = Utc::now();
    let mut events = Vec::with_capacity(message.observations.len());
    for obs in message.observations {
        let plate = obs.plate.trim();
        if plate.is_empty() {
            debug!("observation_blank_plate");
            continue;
        }
        events.push(InputEvent::Observation(PlateObservation {
            plate: PlateId::from(plate),
            observed_at: obs.ts.resolve(now),
            received_at,
        }));
    }
    events
}

/// Parse an operator command
pub fn parse_command(json_str: &str, received_at: Instant) -> Option<InputEvent> {
    let command: WireCommand = match serde_json::from_str(json_str) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to parse command");
            return None;
        }
    };

    match command.action.as_str() {
        "mark_paid" => match command.session_id {
            Some(session_id) => Some(InputEvent::MarkPaid { session_id }),
            None => {
                warn!("mark_paid command missing session_id");
                None
            }
        },
        "close" => match command.plate {
            Some(plate) => Some(InputEvent::CloseSession {
                plate: PlateId::from(plate.trim()),
                received_at,
            }),
            None => {
                warn!("close command missing plate");
                None
            }
        },
        other => {
            warn!(action = %other, "unknown_command_action");
            None
        }
    }
}
