mod client;
mod config;
mod devices;
mod draft;
mod host;
mod logbook;
mod panel;
mod push;
mod render;
mod schedule;
#[cfg(test)]
mod testhost;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "panel.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Host client + controller ────────────────────────────────────
    let host = Arc::new(client::HttpHost::new(&cfg.host.url, cfg.host.token.clone())?);
    let panel = panel::Panel::new(host);
    info!(host = %cfg.host.url, "panel controller ready");

    // ── Web API ─────────────────────────────────────────────────────
    let web_panel = panel.clone();
    let web_port = cfg.web_port;
    tokio::spawn(async move {
        web::serve(web_panel, web_port).await;
    });

    // ── Live-state push subscription ────────────────────────────────
    // The first publish after connect doubles as the bootstrap signal:
    // the controller fetches the registries lazily, never at startup.
    let mut mqttoptions = MqttOptions::new("growbox-panel", cfg.mqtt.host.clone(), cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (mqtt, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    mqtt.subscribe("state/#", QoS::AtLeastOnce).await?;
    info!(broker = %cfg.mqtt.host, port = cfg.mqtt.port, "subscribed to state pushes");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => match push::entity_from_topic(&p.topic) {
                Some(entity_id) => {
                    let value = push::parse_state(&p.payload);
                    panel.on_state_push(entity_id, &value).await;
                }
                None => warn!(topic = %p.topic, "unhandled topic"),
            },
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "mqtt error, reconnecting");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
