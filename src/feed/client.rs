use super::config::FeedConfig;
use super::machine::{ConnectionEvent, ConnectionState, Effect, ReconnectMachine, RetryPolicy};
use super::protocol::{self, FeedMessage};
use super::transport::{FeedConnection, FeedFrame, FeedTransport};
use crate::diagnostics::{DiagnosticCategory, DiagnosticLog};
use crate::state::{ConnectionStatus, TrackingStore};
use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Sleep};
use tracing::{debug, error, info, warn};

/// Longest raw frame excerpt kept in a decode diagnostic
const RAW_EXCERPT_CHARS: usize = 256;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// Handle to the feed driver task.
///
/// Owns exactly one connection at a time. Dropping every handle (or calling
/// `shutdown`) stops the driver.
pub struct StreamClient {
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    state_rx: watch::Receiver<ConnectionState>,
    url: String,
}

impl StreamClient {
    /// Start the driver; the client stays `Disconnected` until `connect`
    pub fn spawn<T: FeedTransport>(
        config: FeedConfig,
        transport: T,
        store: Arc<TrackingStore>,
        diagnostics: Arc<DiagnosticLog>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let policy = RetryPolicy {
            delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
        };

        let url = config.url.clone();
        let driver = Driver {
            url: config.url,
            transport: Arc::new(transport),
            store,
            diagnostics,
            machine: ReconnectMachine::new(policy),
            status_tx,
            state_tx,
        };
        tokio::spawn(driver.run(command_rx));

        Self {
            commands,
            status_rx,
            state_rx,
            url,
        }
    }

    /// Request a connection; a no-op while connecting or connected
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Disconnect and stop the driver task
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Stream client driver has stopped; command ignored");
        }
    }
}

enum Input {
    Command(Option<Command>),
    Opened(Result<Box<dyn FeedConnection>>),
    Frame(FeedFrame),
    RetryDue,
}

struct Driver<T: FeedTransport> {
    url: String,
    transport: Arc<T>,
    store: Arc<TrackingStore>,
    diagnostics: Arc<DiagnosticLog>,
    machine: ReconnectMachine,
    status_tx: watch::Sender<ConnectionStatus>,
    state_tx: watch::Sender<ConnectionState>,
}

/// I/O in flight for the current state
#[derive(Default)]
struct Slots {
    pending: Option<BoxFuture<'static, Result<Box<dyn FeedConnection>>>>,
    connection: Option<Box<dyn FeedConnection>>,
    retry: Option<Pin<Box<Sleep>>>,
}

/// Await an optional future; `None` when the slot is empty
async fn maybe<F: std::future::Future + Unpin>(slot: Option<&mut F>) -> Option<F::Output> {
    match slot {
        Some(future) => Some(future.await),
        None => None,
    }
}

async fn next_frame(connection: Option<&mut Box<dyn FeedConnection>>) -> Option<FeedFrame> {
    match connection {
        Some(connection) => Some(connection.next_frame().await),
        None => None,
    }
}

impl<T: FeedTransport> Driver<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(url = %self.url, "Stream client started");
        let mut slots = Slots::default();

        loop {
            let input = {
                let Slots {
                    pending,
                    connection,
                    retry,
                } = &mut slots;

                tokio::select! {
                    command = commands.recv() => Input::Command(command),
                    Some(result) = maybe(pending.as_mut()), if pending.is_some() => {
                        Input::Opened(result)
                    }
                    Some(frame) = next_frame(connection.as_mut()), if connection.is_some() => {
                        Input::Frame(frame)
                    }
                    Some(()) = maybe(retry.as_mut()), if retry.is_some() => Input::RetryDue,
                }
            };

            match input {
                Input::Command(Some(Command::Connect)) => {
                    self.handle(ConnectionEvent::ConnectRequested, &mut slots).await;
                }
                Input::Command(Some(Command::Disconnect)) => {
                    self.handle(ConnectionEvent::DisconnectRequested, &mut slots).await;
                }
                Input::Command(Some(Command::Shutdown)) | Input::Command(None) => {
                    self.handle(ConnectionEvent::DisconnectRequested, &mut slots).await;
                    break;
                }
                Input::Opened(Ok(mut connection)) => {
                    slots.pending = None;
                    self.handle(ConnectionEvent::Opened, &mut slots).await;
                    if self.machine.state() == ConnectionState::Connected {
                        slots.connection = Some(connection);
                    } else {
                        connection.close().await;
                    }
                }
                Input::Opened(Err(e)) => {
                    slots.pending = None;
                    warn!(error = %e, url = %self.url, "Feed connection failed");
                    self.diagnostics.record_with(
                        DiagnosticCategory::Connection,
                        "Connection attempt failed",
                        json!({ "error": format!("{:#}", e), "attempts": self.machine.attempts() }),
                    );
                    self.handle(ConnectionEvent::TransportError, &mut slots).await;
                }
                Input::Frame(FeedFrame::Text(text)) => self.dispatch(&text),
                Input::Frame(FeedFrame::Invalid(reason)) => {
                    warn!(reason = %reason, "Dropping invalid feed frame");
                    self.diagnostics.record_with(
                        DiagnosticCategory::Decode,
                        "Dropped invalid frame",
                        json!({ "error": reason }),
                    );
                }
                Input::Frame(FeedFrame::Closed { clean }) => {
                    slots.connection = None;
                    if clean {
                        info!("Feed closed the connection");
                    } else {
                        warn!("Feed connection closed abnormally");
                    }
                    self.handle(ConnectionEvent::Closed { clean }, &mut slots).await;
                }
                Input::Frame(FeedFrame::Error(e)) => {
                    slots.connection = None;
                    warn!(error = %e, "Feed transport error");
                    self.diagnostics.record_with(
                        DiagnosticCategory::Connection,
                        "Transport error",
                        json!({ "error": e }),
                    );
                    self.handle(ConnectionEvent::TransportError, &mut slots).await;
                }
                Input::RetryDue => {
                    slots.retry = None;
                    self.handle(ConnectionEvent::RetryDue, &mut slots).await;
                }
            }
        }

        info!("Stream client stopped");
    }

    /// Apply one event to the machine and carry out its effect
    async fn handle(&mut self, event: ConnectionEvent, slots: &mut Slots) {
        let from = self.machine.state();
        let (next, effect) = self.machine.transition(event);
        self.machine = next;

        if next.state() != from {
            self.publish(from, next.state());
        }

        match effect {
            Some(Effect::Open) => {
                let transport = Arc::clone(&self.transport);
                let url = self.url.clone();
                debug!(url = %url, attempt = next.attempts(), "Opening feed connection");
                slots.pending = Some(Box::pin(async move { transport.connect(&url).await }));
            }
            Some(Effect::ScheduleRetry(delay)) => {
                info!(
                    attempt = next.attempts(),
                    max_attempts = next.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                slots.retry = Some(Box::pin(sleep(delay)));
            }
            Some(Effect::CancelRetry) => {
                slots.retry = None;
            }
            Some(Effect::Close) => {
                slots.pending = None;
                if let Some(mut connection) = slots.connection.take() {
                    connection.close().await;
                }
            }
            None => {}
        }
    }

    fn publish(&self, from: ConnectionState, to: ConnectionState) {
        let status = to.status();

        if to == ConnectionState::Failed {
            error!(
                attempts = self.machine.attempts(),
                "Reconnect budget exhausted, giving up"
            );
        } else {
            info!(from = ?from, to = ?to, "Feed connection state changed");
        }

        self.diagnostics.record_with(
            DiagnosticCategory::Connection,
            format!("{:?} -> {:?}", from, to),
            json!({
                "from": from,
                "to": to,
                "status": status,
                "attempts": self.machine.attempts(),
            }),
        );

        self.state_tx.send_replace(to);
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        self.store.set_connection_status(status);
    }

    /// Decode a frame and apply it to the store; bad frames are dropped
    fn dispatch(&self, text: &str) {
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable feed message");
                let raw: String = text.chars().take(RAW_EXCERPT_CHARS).collect();
                self.diagnostics.record_with(
                    DiagnosticCategory::Decode,
                    "Dropped undecodable message",
                    json!({ "error": e.to_string(), "raw": raw }),
                );
                return;
            }
        };

        self.diagnostics.record_with(
            DiagnosticCategory::Message,
            format!("Received {}", message.type_name()),
            json!({
                "type": message.type_name(),
                "entity_id": message.entity_id(),
            }),
        );

        match message {
            FeedMessage::Connection { message } => {
                info!(greeting = message.as_deref().unwrap_or(""), "Feed greeting received");
            }
            FeedMessage::TrackingUpdate(entity) => self.store.upsert(entity),
            FeedMessage::Event { entity, .. } => self.store.upsert(entity),
            FeedMessage::TrackEnded {
                entity_id,
                description,
            } => {
                debug!(
                    entity_id = %entity_id,
                    description = description.as_deref().unwrap_or(""),
                    "Track ended"
                );
                self.store.remove(&entity_id);
            }
        }
    }
}
