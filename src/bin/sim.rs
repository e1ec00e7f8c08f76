//! LPR camera simulator
//!
//! Publishes synthetic observation batches to the gateway's observations
//! topic for local development and load testing. Each simulated vehicle
//! arrives, lingers in camera view for a few duplicate reads, and later
//! departs (with the same duplicate-read burst).
//!
//! Usage:
//!   cargo run --bin lpr-sim                          # 5 vehicles against localhost
//!   cargo run --bin lpr-sim -- --vehicles 50 --dwell-secs 30

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lpr-sim")]
#[command(about = "LPR camera simulator - publishes synthetic plate observations")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Observations topic
    #[arg(long, default_value = "lpr/observations")]
    topic: String,

    /// Number of simulated vehicles
    #[arg(long, default_value_t = 5)]
    vehicles: u32,

    /// Seconds each vehicle stays before the exit observation
    #[arg(long, default_value_t = 10)]
    dwell_secs: u64,

    /// Duplicate reads per sighting (camera re-reads a lingering plate)
    #[arg(long, default_value_t = 3)]
    reads_per_sighting: u32,

    /// Seconds between duplicate reads
    #[arg(long, default_value_t = 2)]
    read_interval_secs: u64,
}

fn plate_for(index: u32) -> String {
    // B1000AAA, B1001AAB, ... vaguely Indonesian-looking plates
    let suffix = [
        (b'A' + ((index / 26) % 26) as u8) as char,
        (b'A' + (index % 26) as u8) as char,
    ];
    format!("B{}A{}{}", 1000 + index, suffix[0], suffix[1])
}

async fn publish_sighting(
    client: &AsyncClient,
    topic: &str,
    plate: &str,
    reads: u32,
    read_interval: Duration,
) {
    for _ in 0..reads {
        let payload = json!({
            "observations": [
                {"plate": plate, "ts": chrono::Utc::now().timestamp_millis()}
            ]
        });
        if let Err(e) =
            client.publish(topic, QoS::AtMostOnce, false, payload.to_string()).await
        {
            warn!(error = %e, plate = %plate, "publish_failed");
        }
        sleep(read_interval).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let client_id = format!("lpr-sim-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, &args.host, args.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

    // Drive the eventloop in the background
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("sim_connected"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "sim_mqtt_error");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    info!(
        host = %args.host,
        port = %args.port,
        topic = %args.topic,
        vehicles = %args.vehicles,
        "sim_started"
    );

    let read_interval = Duration::from_secs(args.read_interval_secs);
    let mut tasks = Vec::new();

    for i in 0..args.vehicles {
        let client = client.clone();
        let topic = args.topic.clone();
        let plate = plate_for(i);
        let dwell = Duration::from_secs(args.dwell_secs);
        let reads = args.reads_per_sighting;

        tasks.push(tokio::spawn(async move {
            // Stagger arrivals so the broker sees a stream, not a thundering herd
            sleep(Duration::from_millis(500 * i as u64)).await;

            info!(plate = %plate, "vehicle_arriving");
            publish_sighting(&client, &topic, &plate, reads, read_interval).await;

            sleep(dwell).await;

            info!(plate = %plate, "vehicle_departing");
            publish_sighting(&client, &topic, &plate, reads, read_interval).await;
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    // Let the last publishes flush
    sleep(Duration::from_secs(1)).await;
    info!("sim_complete");
    Ok(())
}
