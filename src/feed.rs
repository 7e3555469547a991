//! Pub/sub subscription feeding the pipeline.
//!
//! The feed has two link states, `Disconnected` and `Subscribed`. The
//! initial connection must succeed or startup fails; after that the client
//! reconnects on its own and restores the subscription, and connection
//! events move the published [`LinkState`] back and forth.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, Context, Result};
use async_nats::{Client, Event, Subscriber};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Subscribed,
}

/// Link state implied by a client event, `None` if the event does not change it.
///
/// `Connected` only means `Subscribed` once the subscription has been
/// established, since the client re-subscribes on reconnect.
pub fn link_state_for(event: &Event, subscribed: bool) -> Option<LinkState> {
    match event {
        Event::Connected if subscribed => Some(LinkState::Subscribed),
        Event::Disconnected => Some(LinkState::Disconnected),
        _ => None,
    }
}

/// An established subscription to the sensor topic.
pub struct Feed {
    /// Held so the connection outlives any other handle.
    _client: Client,
    subscriber: Subscriber,
    topic: String,
    link: Arc<watch::Sender<LinkState>>,
}

/// Connect to the broker and subscribe to `cfg.topic`.
///
/// Fails if the broker cannot be reached or the subscription is refused.
pub async fn subscribe(cfg: &Config, link: watch::Sender<LinkState>) -> Result<Feed> {
    // ---
    let url = cfg.broker_url();
    let link = Arc::new(link);
    let subscribed = Arc::new(AtomicBool::new(false));

    info!("Connecting to broker at {}", url);

    let client = {
        let link = link.clone();
        let subscribed = subscribed.clone();
        async_nats::ConnectOptions::new()
            .name("parkly-occupancy")
            .event_callback(move |event| {
                let link = link.clone();
                let subscribed = subscribed.clone();
                async move {
                    match &event {
                        Event::Disconnected => warn!("Broker connection lost, client reconnecting"),
                        Event::Connected => info!("Broker connection established"),
                        other => debug!(event = ?other, "Broker client event"),
                    }
                    if let Some(state) = link_state_for(&event, subscribed.load(Ordering::SeqCst)) {
                        link.send_replace(state);
                    }
                }
            })
            .connect(&url)
            .await
            .with_context(|| format!("Failed to connect to broker at {}", url))?
    };

    let subscriber = client
        .subscribe(cfg.topic.clone())
        .await
        .with_context(|| format!("Failed to subscribe to {}", cfg.topic))?;

    subscribed.store(true, Ordering::SeqCst);
    link.send_replace(LinkState::Subscribed);
    info!("Subscribed to topic: {}", cfg.topic);

    Ok(Feed {
        _client: client,
        subscriber,
        topic: cfg.topic.clone(),
        link,
    })
}

impl Feed {
    /// Forward every payload into the pipeline queue.
    ///
    /// Returns an error when the subscription ends, and `Ok` when the
    /// pipeline side of the queue has gone away.
    pub async fn forward(mut self, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
        // ---
        while let Some(message) = self.subscriber.next().await {
            if tx.send(message.payload.to_vec()).await.is_err() {
                info!("Pipeline queue closed, stopping feed");
                return Ok(());
            }
        }

        self.link.send_replace(LinkState::Disconnected);
        error!("Subscription to {} ended", self.topic);
        Err(anyhow!("subscription to {} ended", self.topic))
    }
}
