//! Pushes meter data to remote listeners.
//!
//! Every destination gets a bounded queue and its own task. The task posts
//! one message at a time and holds on to it while backing off, so a slow or
//! unreachable listener only ever loses the newest updates.

use reqwest::{Client, Url};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const QUEUE_CAPACITY: usize = 15;

/// Message exchanged with relay peers, `{"type": "dm", "cmd": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RelayMessage {
    pub fn new(cmd: &str) -> Self {
        Self {
            kind: "dm".to_string(),
            cmd: cmd.to_string(),
            field: None,
            value: None,
            data: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new("data")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Backoff(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Doubles the previous delay up to the cap
    pub fn next_delay(&self, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.initial,
            Some(delay) => (delay * 2).min(self.max),
        }
    }
}

/// Fan-out side, owned by the meter pipeline
#[derive(Debug)]
pub struct RelayPublisher {
    queues: Vec<(Url, mpsc::Sender<Value>)>,
    states: Vec<watch::Receiver<LinkState>>,
}

impl RelayPublisher {
    /// Creates a queue per destination. The returned links must be spawned
    /// to start delivering.
    pub fn new(destinations: &[Url]) -> (Self, Vec<RelayLink>) {
        let mut queues = Vec::new();
        let mut states = Vec::new();
        let mut links = Vec::new();
        for url in destinations {
            let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
            let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
            queues.push((url.clone(), tx));
            states.push(state_rx);
            links.push(RelayLink {
                url: url.clone(),
                queue: rx,
                state: state_tx,
            });
        }
        (Self { queues, states }, links)
    }

    /// Queues a data payload for every destination. Returns how many queues
    /// accepted it.
    pub fn publish(&self, payload: &Value) -> usize {
        let mut accepted = 0;
        for (url, queue) in &self.queues {
            match queue.try_send(payload.clone()) {
                Ok(()) => accepted += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(destination = %url, "Relay queue full, update dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(destination = %url, "Relay link stopped, update dropped");
                }
            }
        }
        accepted
    }

    pub fn link_states(&self) -> Vec<LinkState> {
        self.states.iter().map(|s| *s.borrow()).collect()
    }

    /// Watch for the link state of one destination
    pub fn watch_link(&self, index: usize) -> Option<watch::Receiver<LinkState>> {
        self.states.get(index).cloned()
    }
}

/// Delivery task of one destination
pub struct RelayLink {
    url: Url,
    queue: mpsc::Receiver<Value>,
    state: watch::Sender<LinkState>,
}

impl RelayLink {
    pub fn spawn(self, client: Client, retry: RetryPolicy, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(client, retry, cancel))
    }

    fn set_state(&self, state: LinkState) {
        if *self.state.borrow() != state {
            debug!(destination = %self.url, ?state, "Relay link state");
            self.state.send_replace(state);
        }
    }

    async fn run(mut self, client: Client, retry: RetryPolicy, cancel: CancellationToken) {
        info!(destination = %self.url, "Relay link started");
        let mut held: Option<Value> = None;
        let mut delay: Option<Duration> = None;
        loop {
            let payload = match held.take() {
                Some(payload) => payload,
                None => tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = self.queue.recv() => match next {
                        Some(payload) => payload,
                        None => break,
                    },
                },
            };

            if *self.state.borrow() != LinkState::Connected {
                self.set_state(LinkState::Connecting);
            }
            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = self.post(&client, &payload) => sent,
            };
            match sent {
                Ok(()) => {
                    delay = None;
                    self.set_state(LinkState::Connected);
                }
                Err(e) => {
                    let wait = retry.next_delay(delay);
                    delay = Some(wait);
                    warn!(destination = %self.url, error = %e, backoff = ?wait, "Relay delivery failed");
                    self.set_state(LinkState::Backoff(wait));
                    held = Some(payload);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
        self.set_state(LinkState::Disconnected);
        info!(destination = %self.url, "Relay link stopped");
    }

    async fn post(&self, client: &Client, payload: &Value) -> Result<(), reqwest::Error> {
        client
            .post(self.url.clone())
            .json(&RelayMessage::data(payload.clone()))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
