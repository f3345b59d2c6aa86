//! # Adobe Connect Connector
//!
//! Connector for the Adobe Connect XML API (`/api/xml?action=...`).
//!
//! ## Session
//!
//! `login` yields a `BREEZESESSION` token sent with every request. Requests are serialized
//! per connector. A `no-access/no-login` status triggers exactly one re-login and retry of
//! the same request; a second expiry fails the command.
//!
//! ## Folders
//!
//! Rooms live in a meetings folder and recordings in a recordings folder, both resolved by
//! name under the device's shared shortcuts and created only when absent. Resolved ids are
//! cached for the session. The recordings folder is forced non-public.
//!
//! ## Background loops
//!
//! - capacity check: participants of active managed rooms against their licensed capacity
//! - recording reconciliation: moves recordings still sitting in a room into the folder the
//!   controller assigned to that room

mod folders;
mod reconcile;
mod recordings;
mod rooms;
mod session;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::background::BackgroundTasks;
use super::cache::TtlCache;
use super::controller::{ControllerChannel, ControllerClient};
use super::error::{CommandError, CommandResult};
use super::http::{HttpExchange, ReqwestExchange};
use super::operation::{CapabilitySet, ConnectorOperation};
use super::types::{
    Alias, Credentials, DeviceAddress, Recording, RecordingFolder, RecordingTarget, Room,
    RoomParticipant, RoomSummary,
};
use super::{ConnectionState, ConnectionStateCell, Connector, ConnectorInfo};
use crate::config::{ConfigResult, ConnectorKind, ConnectorOptions};
use crate::constants::{defaults, options as keys};

use folders::FolderCache;
use session::Session;

const CAPABILITIES: CapabilitySet = CapabilitySet::of(&[
    ConnectorOperation::CreateRoom,
    ConnectorOperation::ModifyRoom,
    ConnectorOperation::DeleteRoom,
    ConnectorOperation::GetRoom,
    ConnectorOperation::ListRooms,
    ConnectorOperation::ListRoomParticipants,
    ConnectorOperation::DisconnectParticipant,
    ConnectorOperation::CreateRecordingFolder,
    ConnectorOperation::ModifyRecordingFolder,
    ConnectorOperation::DeleteRecordingFolder,
    ConnectorOperation::StartRecording,
    ConnectorOperation::StopRecording,
    ConnectorOperation::DeleteRecording,
    ConnectorOperation::ListRecordings,
    ConnectorOperation::GetActiveRecording,
    ConnectorOperation::IsRecordingActive,
]);

/// Settings read from the connector options
#[derive(Debug, Clone)]
pub(crate) struct AdobeSettings {
    pub timeout: Duration,
    pub meetings_folder_name: String,
    pub recordings_folder_name: String,
    pub recordings_prefix: String,
    pub recording_name_pattern: Regex,
    pub url_path_prefix: String,
    pub capacity_check_period: Duration,
    pub recordings_check_period: Duration,
    pub recording_poll_interval: Duration,
    pub recording_poll_attempts: u32,
    pub cache_ttl: Duration,
}

impl AdobeSettings {
    fn from_options(options: &ConnectorOptions) -> ConfigResult<Self> {
        let recordings_prefix =
            options.string_or(keys::RECORDINGS_PREFIX, defaults::RECORDINGS_PREFIX);
        let recording_name_pattern = match options.pattern(keys::RECORDING_NAME_PATTERN)? {
            Some(pattern) => pattern,
            None => Regex::new(&format!("^{}", regex::escape(&recordings_prefix))).map_err(|error| {
                crate::config::ConfigurationError::invalid_value(
                    keys::RECORDINGS_PREFIX,
                    recordings_prefix.clone(),
                    error.to_string(),
                )
            })?,
        };

        Ok(Self {
            timeout: options.duration(keys::TIMEOUT, defaults::TIMEOUT)?,
            meetings_folder_name: options
                .string_or(keys::MEETINGS_FOLDER_NAME, defaults::MEETINGS_FOLDER_NAME),
            recordings_folder_name: options
                .string_or(keys::RECORDINGS_FOLDER_NAME, defaults::RECORDINGS_FOLDER_NAME),
            recordings_prefix,
            recording_name_pattern,
            url_path_prefix: options.string_or(keys::URL_PATH_PREFIX, defaults::URL_PATH_PREFIX),
            capacity_check_period: options
                .duration(keys::CAPACITY_CHECK_PERIOD, defaults::CAPACITY_CHECK_PERIOD)?,
            recordings_check_period: options
                .duration(keys::RECORDINGS_CHECK_PERIOD, defaults::RECORDINGS_CHECK_PERIOD)?,
            recording_poll_interval: options
                .duration(keys::RECORDING_POLL_INTERVAL, defaults::RECORDING_POLL_INTERVAL)?,
            recording_poll_attempts: options
                .u32_or(keys::RECORDING_POLL_ATTEMPTS, defaults::RECORDING_POLL_ATTEMPTS)?
                .max(1),
            cache_ttl: options.duration(keys::CACHE_TTL, defaults::CACHE_TTL)?,
        })
    }
}

/// Recording started by this connector and not yet stopped
#[derive(Debug, Clone)]
pub(crate) struct ActiveRecording {
    pub room_id: String,
    pub folder_id: String,
}

/// Connector state shared with the background loops
pub(crate) struct AdobeInner<H> {
    pub device_id: String,
    pub settings: AdobeSettings,
    pub exchange: H,
    pub controller: ControllerClient,
    pub state: ConnectionStateCell,
    pub session: tokio::sync::Mutex<Session>,
    pub folders: tokio::sync::Mutex<FolderCache>,
    /// Licensed capacity of rooms created through this connector
    pub capacities: DashMap<String, u32>,
    /// Last participant count reported per overflowing room
    pub capacity_notified: DashMap<String, usize>,
    pub active_recordings: DashMap<String, ActiveRecording>,
    /// Recordings confirmed to be in a managed recordings folder
    pub stored_recordings: TtlCache<String, ()>,
    pub principals: TtlCache<String, String>,
    pub tasks: BackgroundTasks,
}

pub struct AdobeConnectConnector<H: HttpExchange = ReqwestExchange> {
    inner: Arc<AdobeInner<H>>,
}

impl AdobeConnectConnector<ReqwestExchange> {
    pub fn new(
        device_id: impl Into<String>,
        options: ConnectorOptions,
        controller: Arc<dyn ControllerChannel>,
    ) -> CommandResult<Self> {
        let device_id = device_id.into();
        let timeout = options.duration(keys::TIMEOUT, defaults::TIMEOUT)?;
        let exchange = ReqwestExchange::new(device_id.clone(), timeout)?;
        Self::with_exchange(device_id, options, controller, exchange)
    }
}

impl<H: HttpExchange> AdobeConnectConnector<H> {
    pub fn with_exchange(
        device_id: impl Into<String>,
        options: ConnectorOptions,
        controller: Arc<dyn ControllerChannel>,
        exchange: H,
    ) -> CommandResult<Self> {
        let device_id = device_id.into();
        let settings = AdobeSettings::from_options(&options)?;
        let ttl = settings.cache_ttl;
        Ok(Self {
            inner: Arc::new(AdobeInner {
                controller: ControllerClient::new(controller, device_id.clone(), ttl),
                tasks: BackgroundTasks::new(device_id.clone()),
                device_id,
                settings,
                exchange,
                state: ConnectionStateCell::new(),
                session: tokio::sync::Mutex::new(Session::default()),
                folders: tokio::sync::Mutex::new(FolderCache::default()),
                capacities: DashMap::new(),
                capacity_notified: DashMap::new(),
                active_recordings: DashMap::new(),
                stored_recordings: TtlCache::new(ttl, defaults::CACHE_CAPACITY),
                principals: TtlCache::new(ttl, defaults::CACHE_CAPACITY),
            }),
        })
    }

    /// Id of the managed recordings folder, resolving it if needed
    pub async fn recordings_folder_id(&self) -> CommandResult<String> {
        self.inner.recordings_folder().await
    }

    pub async fn meetings_folder_id(&self) -> CommandResult<String> {
        self.inner.meetings_folder().await
    }

    /// Whether a recording already sits in a managed recordings folder; cached once confirmed
    pub async fn is_recording_stored(&self, recording_id: &str) -> CommandResult<bool> {
        self.inner.is_recording_stored(recording_id).await
    }

    /// Run one capacity check pass
    pub async fn check_capacity(&self) {
        self.inner.check_capacity().await;
    }

    /// Run one recording reconciliation pass
    pub async fn check_recordings(&self) {
        self.inner.check_recordings().await;
    }

    fn start_background_tasks(&self) {
        if !self.inner.tasks.try_start() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.tasks.spawn_periodic(
            "capacity-check",
            self.inner.settings.capacity_check_period,
            weak.clone(),
            |inner: Arc<AdobeInner<H>>| async move { inner.check_capacity().await },
        );
        self.inner.tasks.spawn_periodic(
            "recordings-check",
            self.inner.settings.recordings_check_period,
            weak,
            |inner: Arc<AdobeInner<H>>| async move { inner.check_recordings().await },
        );
    }
}

impl<H: HttpExchange> AdobeInner<H> {
    pub(crate) fn ensure_connected(&self) -> CommandResult<()> {
        if self.state.get().is_connected() {
            Ok(())
        } else {
            Err(CommandError::not_connected(&self.device_id))
        }
    }
}

#[async_trait]
impl<H: HttpExchange> Connector for AdobeConnectConnector<H> {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            device_id: self.inner.device_id.clone(),
            kind: ConnectorKind::AdobeConnect,
            address: self.inner.session.try_lock().ok().and_then(|session| session.address()),
            state: self.inner.state.get(),
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    async fn connect(&self, address: &DeviceAddress, credentials: &Credentials) -> CommandResult<()> {
        let inner = &self.inner;
        inner.state.set(ConnectionState::Connecting);
        info!(device_id = %inner.device_id, address = %address, "🔌 Connecting to Adobe Connect");

        let established = async {
            inner.open_session(address, credentials).await?;
            // Session works, liveness is not verified between requests
            inner.state.set(ConnectionState::LooselyConnected);
            inner.meetings_folder().await?;
            inner.recordings_folder().await?;
            Ok::<(), CommandError>(())
        }
        .await;

        if let Err(error) = established {
            warn!(device_id = %inner.device_id, error = %error, "❌ Adobe Connect connection failed");
            inner.state.set(ConnectionState::Disconnected);
            return Err(error);
        }

        self.start_background_tasks();
        info!(device_id = %inner.device_id, "✅ Adobe Connect connected");
        Ok(())
    }

    async fn disconnect(&self) -> CommandResult<()> {
        let inner = &self.inner;
        inner.state.set(ConnectionState::Disconnected);
        inner.tasks.shutdown().await;
        inner.close_session().await;
        inner.folders.lock().await.clear();
        inner.stored_recordings.clear();
        info!(device_id = %inner.device_id, "🔌 Adobe Connect disconnected");
        Ok(())
    }

    async fn create_room(&self, room: &Room) -> CommandResult<String> {
        self.inner.ensure_connected()?;
        self.inner.create_room(room).await
    }

    async fn modify_room(&self, room: &Room) -> CommandResult<String> {
        self.inner.ensure_connected()?;
        self.inner.modify_room(room).await
    }

    async fn delete_room(&self, room_id: &str) -> CommandResult<()> {
        self.inner.ensure_connected()?;
        self.inner.delete_room(room_id).await
    }

    async fn get_room(&self, room_id: &str) -> CommandResult<Room> {
        self.inner.ensure_connected()?;
        self.inner.get_room(room_id).await
    }

    async fn list_rooms(&self) -> CommandResult<Vec<RoomSummary>> {
        self.inner.ensure_connected()?;
        self.inner.list_rooms().await
    }

    async fn add_room_participants(&self, _room_id: &str, _aliases: &[Alias]) -> CommandResult<Vec<String>> {
        Err(CommandError::unsupported(ConnectorOperation::AddRoomParticipants))
    }

    async fn list_room_participants(&self, room_id: &str) -> CommandResult<Vec<RoomParticipant>> {
        self.inner.ensure_connected()?;
        self.inner.list_room_participants(room_id).await
    }

    async fn disconnect_participant(&self, room_id: &str, participant_id: &str) -> CommandResult<()> {
        self.inner.ensure_connected()?;
        self.inner.disconnect_participant(room_id, participant_id).await
    }

    async fn create_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<String> {
        self.inner.ensure_connected()?;
        self.inner.create_recording_folder(folder).await
    }

    async fn modify_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<()> {
        self.inner.ensure_connected()?;
        self.inner.modify_recording_folder(folder).await
    }

    async fn delete_recording_folder(&self, folder_id: &str) -> CommandResult<()> {
        self.inner.ensure_connected()?;
        self.inner.delete_sco(folder_id).await
    }

    async fn start_recording(&self, folder_id: &str, target: &RecordingTarget) -> CommandResult<String> {
        self.inner.ensure_connected()?;
        self.inner.start_recording(folder_id, target).await
    }

    async fn stop_recording(&self, recording_id: &str) -> CommandResult<()> {
        self.inner.ensure_connected()?;
        self.inner.stop_recording(recording_id).await
    }

    async fn delete_recording(&self, recording_id: &str) -> CommandResult<()> {
        self.inner.ensure_connected()?;
        self.inner.delete_sco(recording_id).await?;
        self.inner.stored_recordings.remove(&recording_id.to_string());
        Ok(())
    }

    async fn list_recordings(&self, folder_id: &str) -> CommandResult<Vec<Recording>> {
        self.inner.ensure_connected()?;
        self.inner.list_recordings(folder_id).await
    }

    async fn get_active_recording(&self, target: &RecordingTarget) -> CommandResult<Option<Recording>> {
        self.inner.ensure_connected()?;
        self.inner.get_active_recording(target).await
    }

    async fn is_recording_active(&self, recording_id: &str) -> CommandResult<bool> {
        self.inner.ensure_connected()?;
        self.inner.is_recording_active(recording_id).await
    }
}
