//! # Device Connectors
//!
//! One [`Connector`] per managed device. A connector owns the device's session state,
//! exposes the uniform command surface used by the executor, maps vendor failures onto
//! [`CommandError`], and runs its background reconciliation loops while connected.
//!
//! ## Capabilities
//!
//! Every command has a default body returning [`CommandError::Unsupported`]. Each variant
//! declares the operations it overrides as a static [`CapabilitySet`], so callers can ask
//! [`Connector::supports`] without a device round trip.
//!
//! ## Variants
//!
//! - [`adobe::AdobeConnectConnector`]: session-cookie XML API with capacity and recording
//!   reconciliation loops
//! - [`cisco_tcs::CiscoTcsConnector`]: digest-authenticated SOAP API with resumable
//!   recording transfer into managed storage

pub mod adobe;
pub mod background;
pub mod cache;
pub mod cisco_tcs;
pub mod command;
pub mod controller;
pub mod error;
pub mod http;
pub mod operation;
pub mod registry;
pub mod types;
pub mod xml;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::info;

pub use background::BackgroundTasks;
pub use cache::TtlCache;
pub use command::Command;
pub use controller::{
    ControllerAction, ControllerChannel, ControllerClient, ControllerReply, LocalizedText,
    LoggingController, Notification,
};
pub use error::{CommandError, CommandResult, ControllerError};
pub use http::{HttpExchange, HttpMethod, HttpRequest, HttpResponse, HttpStream, ReqwestExchange};
pub use operation::{CapabilitySet, ConnectorOperation};
pub use registry::{ConnectorHandle, ConnectorRegistry};
pub use types::{
    AccessMode, Alias, AliasKind, Credentials, DeviceAddress, FolderPermission, ParticipantRole,
    Recording, RecordingFolder, RecordingState, RecordingTarget, Room, RoomConfiguredParticipant,
    RoomParticipant, RoomSummary, UserInformation,
};

use crate::config::{ConfigurationError, ConnectorConfig, ConnectorKind};
use crate::constants::options;
use crate::error::Result;
use crate::storage::LocalStorage;

/// Connection lifecycle of a connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Session established but liveness is not continuously verified
    LooselyConnected = 3,
    Reconnecting = 4,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::LooselyConnected)
    }
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::LooselyConnected,
            4 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::LooselyConnected => write!(f, "loosely_connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Lock-free connection state shared by the command path and background loops
#[derive(Debug)]
pub struct ConnectionStateCell(AtomicU8);

impl ConnectionStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Disconnected as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub device_id: String,
    pub kind: ConnectorKind,
    pub address: Option<String>,
    pub state: ConnectionState,
}

/// Uniform device command surface
#[async_trait]
pub trait Connector: Send + Sync {
    fn info(&self) -> ConnectorInfo;

    /// Operations this connector implements
    fn capabilities(&self) -> CapabilitySet;

    fn supports(&self, operation: ConnectorOperation) -> bool {
        self.capabilities().supports(operation)
    }

    fn is_connected(&self) -> bool {
        self.info().state.is_connected()
    }

    /// Establish the protocol session and start background loops once
    async fn connect(&self, address: &DeviceAddress, credentials: &Credentials) -> CommandResult<()>;

    /// Tear down the session and wait for background work to end
    async fn disconnect(&self) -> CommandResult<()>;

    async fn create_room(&self, _room: &Room) -> CommandResult<String> {
        Err(CommandError::unsupported(ConnectorOperation::CreateRoom))
    }

    /// Apply new settings to an existing room; returns the (possibly new) room id
    async fn modify_room(&self, _room: &Room) -> CommandResult<String> {
        Err(CommandError::unsupported(ConnectorOperation::ModifyRoom))
    }

    async fn delete_room(&self, _room_id: &str) -> CommandResult<()> {
        Err(CommandError::unsupported(ConnectorOperation::DeleteRoom))
    }

    async fn get_room(&self, _room_id: &str) -> CommandResult<Room> {
        Err(CommandError::unsupported(ConnectorOperation::GetRoom))
    }

    async fn list_rooms(&self) -> CommandResult<Vec<RoomSummary>> {
        Err(CommandError::unsupported(ConnectorOperation::ListRooms))
    }

    /// Dial or invite aliases into a room; returns one participant id per alias
    async fn add_room_participants(&self, _room_id: &str, _aliases: &[Alias]) -> CommandResult<Vec<String>> {
        Err(CommandError::unsupported(ConnectorOperation::AddRoomParticipants))
    }

    async fn list_room_participants(&self, _room_id: &str) -> CommandResult<Vec<RoomParticipant>> {
        Err(CommandError::unsupported(ConnectorOperation::ListRoomParticipants))
    }

    async fn disconnect_participant(&self, _room_id: &str, _participant_id: &str) -> CommandResult<()> {
        Err(CommandError::unsupported(ConnectorOperation::DisconnectParticipant))
    }

    async fn create_recording_folder(&self, _folder: &RecordingFolder) -> CommandResult<String> {
        Err(CommandError::unsupported(ConnectorOperation::CreateRecordingFolder))
    }

    async fn modify_recording_folder(&self, _folder: &RecordingFolder) -> CommandResult<()> {
        Err(CommandError::unsupported(ConnectorOperation::ModifyRecordingFolder))
    }

    async fn delete_recording_folder(&self, _folder_id: &str) -> CommandResult<()> {
        Err(CommandError::unsupported(ConnectorOperation::DeleteRecordingFolder))
    }

    /// Start recording into a folder; returns the recording id
    async fn start_recording(&self, _folder_id: &str, _target: &RecordingTarget) -> CommandResult<String> {
        Err(CommandError::unsupported(ConnectorOperation::StartRecording))
    }

    async fn stop_recording(&self, _recording_id: &str) -> CommandResult<()> {
        Err(CommandError::unsupported(ConnectorOperation::StopRecording))
    }

    async fn delete_recording(&self, _recording_id: &str) -> CommandResult<()> {
        Err(CommandError::unsupported(ConnectorOperation::DeleteRecording))
    }

    async fn list_recordings(&self, _folder_id: &str) -> CommandResult<Vec<Recording>> {
        Err(CommandError::unsupported(ConnectorOperation::ListRecordings))
    }

    async fn get_active_recording(&self, _target: &RecordingTarget) -> CommandResult<Option<Recording>> {
        Err(CommandError::unsupported(ConnectorOperation::GetActiveRecording))
    }

    async fn is_recording_active(&self, _recording_id: &str) -> CommandResult<bool> {
        Err(CommandError::unsupported(ConnectorOperation::IsRecordingActive))
    }
}

/// Build the connector a configuration entry describes; nothing is contacted yet
pub fn build_connector(
    config: &ConnectorConfig,
    controller: Arc<dyn ControllerChannel>,
) -> Result<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.kind {
        ConnectorKind::AdobeConnect => Arc::new(adobe::AdobeConnectConnector::new(
            config.device_id.clone(),
            config.options.clone(),
            controller,
        )?),
        ConnectorKind::CiscoTcs => {
            let root = config
                .options
                .required_string(options::STORAGE)
                .map_err(|_| {
                    ConfigurationError::missing_key(format!(
                        "connectors.{}.options.{}",
                        config.device_id,
                        options::STORAGE
                    ))
                })?;
            let storage = Arc::new(LocalStorage::new(
                PathBuf::from(root),
                config.options.string(options::STORAGE_URL).map(str::to_string),
            ));
            Arc::new(cisco_tcs::CiscoTcsConnector::new(
                config.device_id.clone(),
                config.options.clone(),
                controller,
                storage,
            )?)
        }
    };

    info!(
        device_id = %config.device_id,
        kind = ?config.kind,
        capabilities = connector.capabilities().len(),
        "🔌 Connector built"
    );
    Ok(connector)
}

/// Address and credentials of a configured connector
pub fn connection_parameters(config: &ConnectorConfig) -> Result<(DeviceAddress, Credentials)> {
    let address = DeviceAddress::parse(&config.address).map_err(|error| {
        ConfigurationError::invalid_value(
            format!("connectors.{}.address", config.device_id),
            config.address.clone(),
            error.to_string(),
        )
    })?;
    Ok((
        address,
        Credentials::new(config.username.clone(), config.password.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_cell() {
        let cell = ConnectionStateCell::new();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        cell.set(ConnectionState::LooselyConnected);
        assert_eq!(cell.get(), ConnectionState::LooselyConnected);
        assert!(cell.get().is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert_eq!(ConnectionState::from(99), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::LooselyConnected.to_string(), "loosely_connected");
    }

    struct Bare;

    #[async_trait]
    impl Connector for Bare {
        fn info(&self) -> ConnectorInfo {
            ConnectorInfo {
                device_id: "bare".to_string(),
                kind: ConnectorKind::AdobeConnect,
                address: None,
                state: ConnectionState::Disconnected,
            }
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::empty()
        }

        async fn connect(&self, _: &DeviceAddress, _: &Credentials) -> CommandResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> CommandResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_commands_are_unsupported() {
        let connector = Bare;
        assert!(!connector.supports(ConnectorOperation::CreateRoom));
        let error = connector.delete_room("1").await.unwrap_err();
        assert_eq!(
            error,
            CommandError::unsupported(ConnectorOperation::DeleteRoom)
        );
        assert!(connector
            .start_recording("f", &RecordingTarget::Room("1".to_string()))
            .await
            .unwrap_err()
            .is_unsupported());
    }
}
