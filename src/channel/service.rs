//! Channel service: the event loop that owns a [`ChannelClient`].
//!
//! Collaborators never hold the client. They hold a cloneable
//! [`ChannelServiceHandle`] that posts commands to the loop and reads the
//! latest [`ChannelSnapshot`] from a `watch` channel.
//!
//! The loop auto-connects when spawned and tears everything down (close with
//! 1000, both timers cancelled) on [`ChannelService::shutdown`] or when the
//! service is dropped. Handles outliving the service get
//! [`ChannelError::Closed`].

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::client::{ChannelClient, ClientConfig, ClientEvent};
use super::message::ChannelMessage;
use super::transport::Connector;
use super::{ChannelError, ChannelSnapshot, ConnectionStatus, Visibility};

/// Request from a handle to the loop.
#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(serde_json::Value),
    Visibility(Visibility),
    Shutdown,
}

/// Running channel service.
#[derive(Debug)]
pub struct ChannelService {
    handle: ChannelServiceHandle,
    task: Option<JoinHandle<()>>,
}

impl ChannelService {
    /// Start the event loop and connect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<C: Connector>(config: ClientConfig, connector: C) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelSnapshot::default());

        let client = ChannelClient::new(config, connector, events_tx);
        let messages = client.message_sender();
        let task = tokio::spawn(run(client, events_rx, commands_rx, state_tx));

        Self {
            handle: ChannelServiceHandle {
                commands: commands_tx,
                state: state_rx,
                messages,
            },
            task: Some(task),
        }
    }

    /// Handle for collaborators.
    #[must_use]
    pub fn handle(&self) -> ChannelServiceHandle {
        self.handle.clone()
    }

    /// Disconnect and wait for the loop to finish.
    pub async fn shutdown(mut self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[Channel] Service task failed: {e}");
            }
        }
    }
}

impl Drop for ChannelService {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.commands.send(Command::Shutdown);
        }
    }
}

/// Cloneable access to a running [`ChannelService`].
///
/// Every command returns [`ChannelError::Closed`] once the service has shut
/// down.
///
/// The snapshot from [`ChannelServiceHandle::subscribe`] coalesces: it is
/// for status and counters. Consume inbound messages from
/// [`ChannelServiceHandle::messages`], which delivers each one.
#[derive(Debug, Clone)]
pub struct ChannelServiceHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelSnapshot>,
    messages: broadcast::Sender<ChannelMessage>,
}

impl ChannelServiceHandle {
    fn post(&self, command: Command) -> Result<(), ChannelError> {
        self.commands.send(command).map_err(|_closed| ChannelError::Closed)
    }

    /// Connect now. No-op while already connected.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] if the service has stopped.
    pub fn connect(&self) -> Result<(), ChannelError> {
        self.post(Command::Connect)
    }

    /// Close with 1000 and stop retrying.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] if the service has stopped.
    pub fn disconnect(&self) -> Result<(), ChannelError> {
        self.post(Command::Disconnect)
    }

    /// Send a JSON payload if connected; dropped with a warning otherwise.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Serialization`] if `payload` is not representable as
    /// JSON, [`ChannelError::Closed`] if the service has stopped.
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<(), ChannelError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| ChannelError::Serialization(e.to_string()))?;
        self.post(Command::Send(value))
    }

    /// Report a page visibility change.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] if the service has stopped.
    pub fn set_visibility(&self, visibility: Visibility) -> Result<(), ChannelError> {
        self.post(Command::Visibility(visibility))
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        self.state.borrow().clone()
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().status
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChannelSnapshot> {
        self.state.clone()
    }

    /// Receiver for every inbound message parsed after this call.
    ///
    /// A receiver that falls more than the buffer size behind gets
    /// `RecvError::Lagged` and resumes from the oldest retained message.
    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<ChannelMessage> {
        self.messages.subscribe()
    }
}

/// Publish the snapshot if it differs from the last one.
fn publish(state_tx: &watch::Sender<ChannelSnapshot>, snapshot: ChannelSnapshot) {
    state_tx.send_if_modified(|current| {
        if *current == snapshot {
            false
        } else {
            *current = snapshot;
            true
        }
    });
}

async fn run<C: Connector>(
    mut client: ChannelClient<C>,
    mut events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    mut commands_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ChannelSnapshot>,
) {
    log::info!("[Channel] Service started for {}", client.config().url);
    client.connect();
    publish(&state_tx, client.snapshot());

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                client.handle_event(event);
            }

            command = commands_rx.recv() => {
                match command {
                    Some(Command::Connect) => client.connect(),
                    Some(Command::Disconnect) => client.disconnect(),
                    Some(Command::Send(value)) => {
                        client.send(&value);
                    }
                    Some(Command::Visibility(visibility)) => client.on_visibility(visibility),
                    Some(Command::Shutdown) | None => {
                        client.disconnect();
                        publish(&state_tx, client.snapshot());
                        break;
                    }
                }
            }
        }

        publish(&state_tx, client.snapshot());
    }

    log::info!("[Channel] Service stopped");
}
