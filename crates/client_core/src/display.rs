//! Passive display client: keeps a local picture of the ceremony in sync with
//! the server's `/ws` channel, reconnecting on its own.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use shared::protocol::{
    CeremonySnapshot, CeremonyTotals, ClientRequest, GraduatePayload, Overview, ServerEvent,
};
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DisplayState {
    /// Nothing received on the current connection yet.
    #[default]
    Loading,
    Live {
        revision: u64,
        snapshot: CeremonySnapshot,
        overview: Option<Overview>,
        last_called: Option<GraduatePayload>,
    },
    Complete {
        revision: u64,
        totals: CeremonyTotals,
    },
}

impl DisplayState {
    pub fn revision(&self) -> Option<u64> {
        match self {
            DisplayState::Loading => None,
            DisplayState::Live { revision, .. } | DisplayState::Complete { revision, .. } => {
                Some(*revision)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Connected,
    Called(GraduatePayload),
    StateChanged(DisplayState),
    Reconnecting { attempt: u32, delay: Duration },
    ServerError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Doubles from `initial` per attempt, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial
            .saturating_mul(1u32 << exponent)
            .min(self.max)
    }
}

/// Event kinds that share one publication revision.
#[derive(Debug, Clone, Copy)]
enum Part {
    Called = 1,
    Summary = 2,
    Overview = 4,
}

/// Folds server events into a [`DisplayState`], dropping anything older than
/// what it already showed and any repeat of a part it already took.
#[derive(Debug, Default)]
pub(crate) struct DisplayTracker {
    delivered: Option<u64>,
    seen: u8,
    state: DisplayState,
}

impl DisplayTracker {
    pub(crate) fn state(&self) -> &DisplayState {
        &self.state
    }

    /// A fresh connection always starts with a full snapshot, so it may
    /// restart revision numbering (for instance after a server restart).
    pub(crate) fn reconnected(&mut self) {
        self.delivered = None;
        self.seen = 0;
    }

    fn admit(&mut self, revision: u64, part: Part) -> bool {
        let bit = part as u8;
        match self.delivered {
            Some(delivered) if revision < delivered => false,
            Some(delivered) if revision == delivered => {
                if self.seen & bit != 0 {
                    return false;
                }
                self.seen |= bit;
                true
            }
            _ => {
                self.delivered = Some(revision);
                self.seen = bit;
                true
            }
        }
    }

    pub(crate) fn apply(&mut self, event: ServerEvent) -> Vec<DisplayEvent> {
        match event {
            ServerEvent::GraduateCalled(envelope) => {
                if !self.admit(envelope.revision, Part::Called) {
                    return Vec::new();
                }
                if let DisplayState::Live { last_called, .. } = &mut self.state {
                    *last_called = Some(envelope.data.clone());
                }
                vec![DisplayEvent::Called(envelope.data)]
            }
            ServerEvent::GraduateSummary(envelope) => {
                if !self.admit(envelope.revision, Part::Summary) {
                    return Vec::new();
                }
                let revision = envelope.revision;
                let snapshot = envelope.data;
                self.state = if snapshot.all_rounds_complete {
                    DisplayState::Complete {
                        revision,
                        totals: snapshot.graduate_summary,
                    }
                } else {
                    let (overview, last_called) = match std::mem::take(&mut self.state) {
                        DisplayState::Live {
                            overview,
                            last_called,
                            ..
                        } => (overview, last_called),
                        _ => (None, None),
                    };
                    DisplayState::Live {
                        revision,
                        snapshot,
                        overview,
                        last_called,
                    }
                };
                vec![DisplayEvent::StateChanged(self.state.clone())]
            }
            ServerEvent::GraduateOverview(envelope) => {
                if !self.admit(envelope.revision, Part::Overview) {
                    return Vec::new();
                }
                match &mut self.state {
                    DisplayState::Live {
                        revision, overview, ..
                    } => {
                        *revision = envelope.revision;
                        *overview = envelope.data;
                        vec![DisplayEvent::StateChanged(self.state.clone())]
                    }
                    _ => Vec::new(),
                }
            }
            ServerEvent::Error { message, .. } => vec![DisplayEvent::ServerError(message)],
        }
    }
}

struct Shared {
    state: RwLock<DisplayState>,
    events: broadcast::Sender<DisplayEvent>,
}

impl Shared {
    fn emit(&self, event: DisplayEvent) {
        let _ = self.events.send(event);
    }
}

/// Background subscription to a ceremony server. Dropping it stops the task.
pub struct DisplaySubscriber {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl DisplaySubscriber {
    /// Starts following `server_url` (the same http(s) base the operator client uses).
    pub fn spawn(server_url: &str, policy: BackoffPolicy) -> ClientResult<Self> {
        let ws_url = websocket_url(server_url)?;
        let (events, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            state: RwLock::new(DisplayState::Loading),
            events,
        });
        let task = tokio::spawn(run(ws_url, policy, Arc::clone(&shared)));
        Ok(Self { shared, task })
    }

    pub async fn state(&self) -> DisplayState {
        self.shared.state.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for DisplaySubscriber {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn websocket_url(server_url: &str) -> ClientResult<Url> {
    let mut url = Url::parse(server_url)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ClientError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Scheme(scheme.to_string()))?;
    Ok(url.join("/ws")?)
}

async fn run(ws_url: Url, policy: BackoffPolicy, shared: Arc<Shared>) {
    let mut tracker = DisplayTracker::default();
    let mut attempt: u32 = 0;

    loop {
        match connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                info!(%ws_url, "display connected");
                attempt = 0;
                tracker.reconnected();
                shared.emit(DisplayEvent::Connected);
                if let Err(err) = follow(stream, &mut tracker, &shared).await {
                    debug!(%err, "display connection dropped");
                }
            }
            Err(err) => debug!(%ws_url, %err, "display connect failed"),
        }

        attempt = attempt.saturating_add(1);
        let delay = policy.delay(attempt);
        shared.emit(DisplayEvent::Reconnecting { attempt, delay });
        tokio::time::sleep(delay).await;
    }
}

async fn follow<S>(stream: S, tracker: &mut DisplayTracker, shared: &Shared) -> Result<()>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut writer, mut reader) = stream.split();
    let request = serde_json::to_string(&ClientRequest::RequestSummary)?;
    writer.send(Message::Text(request)).await?;

    while let Some(message) = reader.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => {
                    let emitted = tracker.apply(event);
                    if emitted.is_empty() {
                        continue;
                    }
                    *shared.state.write().await = tracker.state().clone();
                    for event in emitted {
                        shared.emit(event);
                    }
                }
                Err(err) => warn!(%err, "ignoring unrecognised server event"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/display_tests.rs"]
mod tests;
