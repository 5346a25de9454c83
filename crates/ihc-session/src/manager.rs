//! The session manager: a handle plus three background tasks.
//!
//! ```text
//!   callers ──(OutboundCommand)──▶ dispatcher ──send/poll──▶ transport
//!                                      │                         │
//!                                      ▼                         ▼
//!                                image loader            receive loop
//!                                      │                         │
//!                                      └──────▶ notifications ◀──┘
//! ```
//!
//! The dispatcher is the only consumer of the outbound queue. It waits for
//! the next command with an idle timeout and sends a keepalive whenever
//! that timeout elapses, so it never blocks for longer than one window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ihc_protocol::codec::decode_device;
use ihc_protocol::{
    DeviceType, DeviceTypeRegistry, Header, HistoryEntry, HistoryFilter,
    OutboundCommand, Packet, decode_count, decode_device_types,
    decode_devices, decode_history, decode_users,
};
use ihc_transport::{SendFlags, Transport, TransportError, TransportEvents};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::images::ImageLoader;
use crate::{Notification, SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// SessionEvents
// ---------------------------------------------------------------------------

/// Connectivity state and the notification path. The transport's receive
/// loop reports into this; the dispatcher and image loader publish
/// through it.
pub(crate) struct SessionEvents {
    connected: AtomicBool,
    enabled: AtomicBool,
    notifications: broadcast::Sender<Notification>,
    registry: Arc<DeviceTypeRegistry>,
}

impl SessionEvents {
    pub(crate) fn new(
        notifications: broadcast::Sender<Notification>,
        registry: Arc<DeviceTypeRegistry>,
    ) -> Self {
        Self {
            connected: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            notifications,
            registry,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn registry(&self) -> &Arc<DeviceTypeRegistry> {
        &self.registry
    }

    pub(crate) fn publish(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.notifications.send(notification);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Stores the flag and notifies only if it flipped.
    fn update_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            tracing::info!(connected, "connectivity changed");
            self.publish(Notification::ConnectivityChanged {
                connected,
                error: None,
            });
        }
    }

    fn state_changed(&self, packet: &Packet) -> Notification {
        let raw = packet.text_lossy();
        let result = packet
            .text()
            .map_err(|e| e.to_string())
            .and_then(|text| {
                decode_device(text, 0, &self.registry)
                    .map(|(device, _)| device)
                    .map_err(|e| e.to_string())
            })
            .map_err(|e| format!("failed to parse changed device: {raw} | {e}"));
        Notification::DeviceStateChanged { result }
    }
}

impl TransportEvents for SessionEvents {
    fn set_connected(&self, connected: bool) {
        // Nothing reconnects a stopped manager.
        if connected && !self.is_enabled() {
            return;
        }
        self.update_connected(connected);
    }

    fn dispatch_async(&self, packet: Packet) {
        match packet.header {
            Header::ERROR => {
                let error = packet.text_lossy().into_owned();
                tracing::warn!(%error, "server reported an error");
                self.publish(Notification::ConnectivityChanged {
                    connected: self.is_connected(),
                    error: Some(error),
                });
            }
            Header::USERS_CHANGED => self.publish(Notification::UsersChanged),
            Header::STATE_CHANGED => self.publish(self.state_changed(&packet)),
            Header::KEEPALIVE | Header::SEND_COMMAND => {
                tracing::trace!(header = %packet.header, "acknowledged");
            }
            header => tracing::debug!(%header, "unhandled push"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    events: Arc<SessionEvents>,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Arc<OutboundCommand>>,
    images: mpsc::UnboundedSender<Arc<DeviceType>>,
}

fn expects_reply(header: Header) -> bool {
    matches!(
        header,
        Header::LIST_DEVICE_TYPES
            | Header::LIST_DEVICES
            | Header::LIST_USERS
            | Header::COUNT_HISTORY
            | Header::LIST_HISTORY
    )
}

impl<T: Transport> Dispatcher<T> {
    async fn run(mut self) {
        tracing::info!("dispatcher started");

        loop {
            let idle = self.config.keepalive_interval(self.events.is_connected());
            let command = match tokio::time::timeout(idle, self.commands.recv()).await {
                Ok(Some(command)) => command,
                // Every handle is gone.
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(?idle, "idle, sending keepalive");
                    let keepalive = OutboundCommand::keepalive();
                    self.send(keepalive.header(), keepalive.payload()).await;
                    continue;
                }
            };

            let header = command.header();
            if header == Header::EXIT {
                self.send(header, command.payload()).await;
                break;
            }
            // Commands queued ahead of the logoff still go out. Listings
            // and history queries would only wait for a reply nobody reads.
            if !self.events.is_enabled() && expects_reply(header) {
                tracing::debug!(%command, "dropping request after shutdown");
                command.set_response(None);
                continue;
            }
            self.process(&command).await;
        }

        self.transport.shutdown();
        tracing::info!("dispatcher stopped");
    }

    async fn process(&self, command: &OutboundCommand) {
        tracing::debug!(%command, "processing");

        match command.header() {
            Header::LIST_DEVICE_TYPES => self.list_device_types(command).await,
            Header::LIST_DEVICES => self.list_devices(command).await,
            Header::LIST_USERS => self.list_users(command).await,
            Header::COUNT_HISTORY | Header::LIST_HISTORY => {
                let reply = self
                    .request(command, self.config.history_poll())
                    .await
                    .ok();
                command.set_response(reply);
            }
            header => {
                self.send(header, command.payload()).await;
            }
        }
    }

    /// Sends and logs a failure. Returns `true` on success.
    async fn send(&self, header: Header, payload: &[u8]) -> bool {
        match self.transport.send(header, payload, SendFlags::NONE).await {
            Ok(()) => true,
            // Expected until the transport has logged in.
            Err(e @ (TransportError::NotConnected | TransportError::NoSession)) => {
                tracing::debug!(%header, error = %e, "not sent");
                false
            }
            Err(e) => {
                if self.events.is_enabled() {
                    tracing::error!(%header, error = %e, "send failed");
                } else {
                    tracing::debug!(%header, error = %e, "send failed after shutdown");
                }
                false
            }
        }
    }

    /// Sends `command` and waits for the reply with the same header.
    async fn request(
        &self,
        command: &OutboundCommand,
        timeout: std::time::Duration,
    ) -> Result<Packet, String> {
        let header = command.header();
        if !self.send(header, command.payload()).await {
            return Err(format!("failed to send {}", header.name()));
        }
        self.transport
            .poll(header, timeout)
            .await
            .ok_or_else(|| format!("no reply to {} within {timeout:?}", header.name()))
    }

    async fn list_device_types(&self, command: &OutboundCommand) {
        let registry = self.events.registry();
        let result = self
            .request(command, self.config.response_timeout())
            .await
            .and_then(|reply| {
                let text = reply.text().map_err(|e| e.to_string())?;
                decode_device_types(text, registry)
                    .map_err(|e| format!("invalid response: {e}"))
            });

        let error = match result {
            Ok(types) => {
                tracing::info!(count = types.len(), "device types listed");
                for device_type in registry.pending_images() {
                    let _ = self.images.send(device_type);
                }
                None
            }
            Err(error) => {
                tracing::warn!(%error, "device type listing failed");
                Some(error)
            }
        };
        self.events.publish(Notification::DeviceTypesListed { error });
    }

    async fn list_devices(&self, command: &OutboundCommand) {
        let registry = self.events.registry();
        let result = self
            .request(command, self.config.response_timeout())
            .await
            .and_then(|reply| {
                let text = reply.text().map_err(|e| e.to_string())?;
                decode_devices(text, registry)
                    .map_err(|e| format!("invalid response: {e}"))
            });

        if let Err(error) = &result {
            tracing::warn!(%error, "device listing failed");
        }
        self.events.publish(Notification::DeviceListUpdated { result });
    }

    async fn list_users(&self, command: &OutboundCommand) {
        let result = self
            .request(command, self.config.response_timeout())
            .await
            .and_then(|reply| {
                let text = reply.text().map_err(|e| e.to_string())?;
                decode_users(text).map_err(|e| format!("invalid response: {e}"))
            });

        if let Err(error) = &result {
            tracing::warn!(%error, "user listing failed");
        }
        self.events.publish(Notification::UsersListed { result });
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Handle to a running session.
///
/// Requests are queued and return immediately; their results arrive as
/// [`Notification`]s. The history queries are the exception: they wait
/// for their own result and return `None` when none arrived in time.
pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    events: Arc<SessionEvents>,
    config: SessionConfig,
    commands: mpsc::UnboundedSender<Arc<OutboundCommand>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<T: Transport> SessionManager<T> {
    /// Starts a session with its own registry and notification channel.
    pub async fn start(transport: T, config: SessionConfig) -> Result<Self, SessionError> {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self::start_with(
            transport,
            config,
            Arc::new(DeviceTypeRegistry::new()),
            notifications,
        )
        .await
    }

    /// Starts a session that shares `registry` and publishes on
    /// `notifications`, so both outlive a restart.
    pub async fn start_with(
        transport: T,
        config: SessionConfig,
        registry: Arc<DeviceTypeRegistry>,
        notifications: broadcast::Sender<Notification>,
    ) -> Result<Self, SessionError> {
        transport.initialize().await?;

        let transport = Arc::new(transport);
        let events = Arc::new(SessionEvents::new(notifications, registry));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (images_tx, images_rx) = mpsc::unbounded_channel();

        let receive_task = {
            let transport = Arc::clone(&transport);
            let events = Arc::clone(&events);
            tokio::spawn(async move { transport.run(events).await })
        };

        let dispatcher = Dispatcher {
            transport: Arc::clone(&transport),
            events: Arc::clone(&events),
            config: config.clone(),
            commands: commands_rx,
            images: images_tx,
        };
        let dispatch_task = tokio::spawn(dispatcher.run());

        let loader = ImageLoader::new(
            Arc::clone(&transport),
            Arc::clone(&events),
            config.image_timeout(),
        );
        let image_task = tokio::spawn(loader.run(images_rx));

        tracing::info!("session manager started");
        Ok(Self {
            transport,
            events,
            config,
            commands: commands_tx,
            tasks: vec![dispatch_task, receive_task, image_task],
        })
    }

    fn enqueue(&self, command: OutboundCommand) -> Result<Arc<OutboundCommand>, SessionError> {
        if !self.events.is_enabled() {
            return Err(SessionError::NotRunning);
        }
        let command = Arc::new(command);
        self.commands
            .send(Arc::clone(&command))
            .map_err(|_| SessionError::NotRunning)?;
        Ok(command)
    }

    // -- Requests ---------------------------------------------------------

    /// Lists device types; answered by [`Notification::DeviceTypesListed`].
    pub fn request_device_types(&self) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::list_device_types()).map(drop)
    }

    /// Lists devices, optionally of one type; answered by
    /// [`Notification::DeviceListUpdated`].
    pub fn request_devices(&self, type_id: Option<u32>) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::list_devices(type_id)).map(drop)
    }

    pub fn send_command(
        &self,
        device_id: &str,
        command_id: u32,
        parameter: Option<&str>,
    ) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::send_command(device_id, command_id, parameter))
            .map(drop)
    }

    pub fn rename_device(&self, device_id: &str, name: &str) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::rename_device(device_id, name)).map(drop)
    }

    /// Counts history entries. `None` if the manager is stopped, no reply
    /// arrived in time, or the reply was not a number.
    pub async fn count_history(&self, filter: &HistoryFilter) -> Option<u64> {
        let command = self.enqueue(OutboundCommand::count_history(filter)).ok()?;
        let reply = command.wait_for_response(self.config.history_wait()).await?;
        let text = reply.text().ok()?;
        decode_count(text)
            .inspect_err(|e| tracing::warn!(error = %e, "invalid history count"))
            .ok()
    }

    /// Lists one page of history entries. `None` if the manager is
    /// stopped, no reply arrived in time, or the reply was malformed.
    pub async fn list_history(
        &self,
        filter: &HistoryFilter,
        limit: u32,
        offset: u32,
    ) -> Option<Vec<HistoryEntry>> {
        let command = self
            .enqueue(OutboundCommand::list_history(filter, limit, offset))
            .ok()?;
        let reply = command.wait_for_response(self.config.history_wait()).await?;
        let text = reply.text().ok()?;
        decode_history(text)
            .inspect_err(|e| tracing::warn!(error = %e, "invalid history listing"))
            .ok()
    }

    /// Lists users; answered by [`Notification::UsersListed`].
    pub fn request_users(&self) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::list_users()).map(drop)
    }

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::create_user(username, password_hash))
            .map(drop)
    }

    pub fn edit_user(
        &self,
        user_id: u32,
        username: &str,
        password_hash: &str,
    ) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::edit_user(user_id, username, password_hash))
            .map(drop)
    }

    pub fn delete_user(&self, user_id: u32) -> Result<(), SessionError> {
        self.enqueue(OutboundCommand::delete_user(user_id)).map(drop)
    }

    // -- State ------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.events.is_connected()
    }

    /// `true` only while connected as an administrator.
    pub fn is_administrator(&self) -> bool {
        self.is_connected() && self.transport.is_administrator()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.notifications.subscribe()
    }

    pub fn registry(&self) -> &Arc<DeviceTypeRegistry> {
        self.events.registry()
    }

    /// Stops the session: rejects new requests, lets the dispatcher send
    /// the commands already queued and a final logoff, then waits for
    /// every task to finish. Queued listings and history queries are
    /// dropped without a reply.
    pub async fn stop(mut self) {
        tracing::info!("stopping session manager");
        self.events.disable();
        if self.commands.send(Arc::new(OutboundCommand::exit())).is_err() {
            // Dispatcher already gone; make sure the transport stops too.
            self.transport.shutdown();
        }

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "session task failed");
            }
        }

        self.events.update_connected(false);
        tracing::info!("session manager stopped");
    }
}

/// Dropping a manager without [`SessionManager::stop`] skips the logoff
/// but still ends the background tasks.
impl<T: Transport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        tracing::debug!("session manager dropped without stop");
        self.events.disable();
        self.transport.shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }
}
