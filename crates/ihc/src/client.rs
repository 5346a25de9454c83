//! `IhcClient`: the long-lived owner of a session manager.
//!
//! A client outlives any number of sessions. The device-type registry and
//! the notification channel belong to the client, so subscribers and
//! cached types survive a restart.

use std::sync::Arc;

use ihc_protocol::{DeviceTypeRegistry, HistoryEntry, HistoryFilter};
use ihc_session::{Notification, SessionError, SessionManager};
use ihc_transport::ClientTransport;
use tokio::sync::{Mutex, RwLock, broadcast};

use crate::{IhcConfig, IhcError};

type Manager = SessionManager<ClientTransport>;

/// Starts, stops and restarts sessions, and forwards requests to the
/// running one.
///
/// Lifecycle calls are serialized by one lock; requests only wait for a
/// lifecycle call that is replacing the manager.
pub struct IhcClient {
    /// Held for the whole of every start, stop and restart.
    lifecycle: Mutex<IhcConfig>,
    manager: RwLock<Option<Manager>>,
    registry: Arc<DeviceTypeRegistry>,
    notifications: broadcast::Sender<Notification>,
}

impl IhcClient {
    pub fn new(config: IhcConfig) -> Self {
        let (notifications, _) =
            broadcast::channel(config.session.notification_capacity.max(1));
        Self {
            lifecycle: Mutex::new(config),
            manager: RwLock::new(None),
            registry: Arc::new(DeviceTypeRegistry::new()),
            notifications,
        }
    }

    // -- Lifecycle --------------------------------------------------------

    /// Starts a session with the current configuration. Does nothing if
    /// one is already running.
    pub async fn start(&self) -> Result<(), IhcError> {
        let config = self.lifecycle.lock().await;
        self.start_locked(&config).await
    }

    /// Stops the running session, if any. Commands queued before the call
    /// still go out ahead of the logoff.
    pub async fn stop(&self) {
        let _config = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Stops the running session and starts a fresh one. No other
    /// lifecycle call can run in between.
    pub async fn restart(&self) -> Result<(), IhcError> {
        let config = self.lifecycle.lock().await;
        self.stop_locked().await;
        self.start_locked(&config).await
    }

    /// Replaces the configuration and restarts with it.
    pub async fn reconfigure(&self, new_config: IhcConfig) -> Result<(), IhcError> {
        let mut config = self.lifecycle.lock().await;
        self.stop_locked().await;
        *config = new_config;
        self.start_locked(&config).await
    }

    async fn start_locked(&self, config: &IhcConfig) -> Result<(), IhcError> {
        let mut slot = self.manager.write().await;
        if slot.is_some() {
            tracing::debug!("client already running");
            return Ok(());
        }

        tracing::info!(
            mode = %config.connection.mode,
            host = ?config.connection.host,
            port = config.connection.port,
            "starting client"
        );
        let transport = ClientTransport::from_config(config.connection.clone());
        let manager = SessionManager::start_with(
            transport,
            config.session.clone(),
            Arc::clone(&self.registry),
            self.notifications.clone(),
        )
        .await?;
        *slot = Some(manager);
        Ok(())
    }

    async fn stop_locked(&self) {
        // Taken out first so requests see "not running" while it winds down.
        let manager = self.manager.write().await.take();
        if let Some(manager) = manager {
            manager.stop().await;
            tracing::info!("client stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.manager.read().await.is_some()
    }

    // -- Requests ---------------------------------------------------------

    async fn with_manager(
        &self,
        request: impl FnOnce(&Manager) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        let manager = self.manager.read().await;
        request(manager.as_ref().ok_or(SessionError::NotRunning)?)
    }

    pub async fn request_device_types(&self) -> Result<(), SessionError> {
        self.with_manager(|m| m.request_device_types()).await
    }

    pub async fn request_devices(&self, type_id: Option<u32>) -> Result<(), SessionError> {
        self.with_manager(|m| m.request_devices(type_id)).await
    }

    pub async fn send_command(
        &self,
        device_id: &str,
        command_id: u32,
        parameter: Option<&str>,
    ) -> Result<(), SessionError> {
        self.with_manager(|m| m.send_command(device_id, command_id, parameter))
            .await
    }

    pub async fn rename_device(&self, device_id: &str, name: &str) -> Result<(), SessionError> {
        self.with_manager(|m| m.rename_device(device_id, name)).await
    }

    /// `None` when stopped or when the server did not answer in time.
    pub async fn count_history(&self, filter: &HistoryFilter) -> Option<u64> {
        let manager = self.manager.read().await;
        manager.as_ref()?.count_history(filter).await
    }

    /// `None` when stopped or when the server did not answer in time.
    pub async fn list_history(
        &self,
        filter: &HistoryFilter,
        limit: u32,
        offset: u32,
    ) -> Option<Vec<HistoryEntry>> {
        let manager = self.manager.read().await;
        manager.as_ref()?.list_history(filter, limit, offset).await
    }

    pub async fn request_users(&self) -> Result<(), SessionError> {
        self.with_manager(|m| m.request_users()).await
    }

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<(), SessionError> {
        self.with_manager(|m| m.create_user(username, password_hash))
            .await
    }

    pub async fn edit_user(
        &self,
        user_id: u32,
        username: &str,
        password_hash: &str,
    ) -> Result<(), SessionError> {
        self.with_manager(|m| m.edit_user(user_id, username, password_hash))
            .await
    }

    pub async fn delete_user(&self, user_id: u32) -> Result<(), SessionError> {
        self.with_manager(|m| m.delete_user(user_id)).await
    }

    // -- State ------------------------------------------------------------

    pub async fn is_connected(&self) -> bool {
        self.manager
            .read()
            .await
            .as_ref()
            .is_some_and(|m| m.is_connected())
    }

    /// `true` only while connected as an administrator.
    pub async fn is_administrator(&self) -> bool {
        self.manager
            .read()
            .await
            .as_ref()
            .is_some_and(|m| m.is_administrator())
    }

    /// Subscribes to notifications of this and every later session.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn registry(&self) -> &Arc<DeviceTypeRegistry> {
        &self.registry
    }
}
