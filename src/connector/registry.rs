//! # Connector Registry
//!
//! Device id to connector lookup used by the executor. A [`ConnectorHandle`] is the
//! command channel contract: send a command, get a result or a typed failure, bounded by
//! the configured command timeout.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::error::{CommandError, CommandResult};
use super::operation::ConnectorOperation;
use super::types::{Alias, RecordingFolder, RecordingTarget, Room};
use super::Connector;
use crate::execution::DeviceId;
use crate::logging::log_device_command;

pub struct ConnectorRegistry {
    connectors: DashMap<DeviceId, Arc<dyn Connector>>,
    command_timeout: Duration,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("devices", &self.devices())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl ConnectorRegistry {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            connectors: DashMap::new(),
            command_timeout,
        }
    }

    /// Register a connector; replaces any previous connector for the device
    pub fn register(&self, device_id: DeviceId, connector: Arc<dyn Connector>) {
        info!(device_id = %device_id, "📝 Registering connector");
        self.connectors.insert(device_id, connector);
    }

    pub fn unregister(&self, device_id: &DeviceId) -> Option<Arc<dyn Connector>> {
        self.connectors.remove(device_id).map(|(_, connector)| connector)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<ConnectorHandle> {
        self.connectors.get(device_id).map(|entry| ConnectorHandle {
            device_id: device_id.clone(),
            connector: entry.value().clone(),
            timeout: self.command_timeout,
        })
    }

    /// Registered devices in id order
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.connectors.iter().map(|entry| entry.key().clone()).collect();
        devices.sort();
        devices
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Disconnect every connector, logging failures
    pub async fn disconnect_all(&self) {
        let connectors: Vec<_> = self
            .connectors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (device_id, connector) in connectors {
            if let Err(error) = connector.disconnect().await {
                warn!(device_id = %device_id, error = %error, "⚠️ Connector disconnect failed");
            }
        }
    }
}

/// Command channel to one device
#[derive(Clone)]
pub struct ConnectorHandle {
    device_id: DeviceId,
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("device_id", &self.device_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConnectorHandle {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn supports(&self, operation: ConnectorOperation) -> bool {
        self.connector.supports(operation)
    }

    /// Run a command future after the capability check, bounded by the command timeout
    pub async fn call<T, Fut>(&self, operation: ConnectorOperation, command: Fut) -> CommandResult<T>
    where
        Fut: Future<Output = CommandResult<T>>,
    {
        if !self.connector.supports(operation) {
            return Err(CommandError::unsupported(operation));
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, command).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::timeout(
                operation.as_str(),
                self.timeout.as_millis() as u64,
            )),
        };

        let status = match &result {
            Ok(_) => "ok",
            Err(error) => error.kind(),
        };
        log_device_command(
            self.device_id.as_str(),
            operation.as_str(),
            status,
            started.elapsed().as_millis() as u64,
        );
        result
    }

    pub async fn create_room(&self, room: &Room) -> CommandResult<String> {
        self.call(ConnectorOperation::CreateRoom, self.connector.create_room(room))
            .await
    }

    pub async fn modify_room(&self, room: &Room) -> CommandResult<String> {
        self.call(ConnectorOperation::ModifyRoom, self.connector.modify_room(room))
            .await
    }

    pub async fn delete_room(&self, room_id: &str) -> CommandResult<()> {
        self.call(ConnectorOperation::DeleteRoom, self.connector.delete_room(room_id))
            .await
    }

    pub async fn add_room_participants(&self, room_id: &str, aliases: &[Alias]) -> CommandResult<Vec<String>> {
        self.call(
            ConnectorOperation::AddRoomParticipants,
            self.connector.add_room_participants(room_id, aliases),
        )
        .await
    }

    pub async fn disconnect_participant(&self, room_id: &str, participant_id: &str) -> CommandResult<()> {
        self.call(
            ConnectorOperation::DisconnectParticipant,
            self.connector.disconnect_participant(room_id, participant_id),
        )
        .await
    }

    pub async fn create_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<String> {
        self.call(
            ConnectorOperation::CreateRecordingFolder,
            self.connector.create_recording_folder(folder),
        )
        .await
    }

    pub async fn start_recording(&self, folder_id: &str, target: &RecordingTarget) -> CommandResult<String> {
        self.call(
            ConnectorOperation::StartRecording,
            self.connector.start_recording(folder_id, target),
        )
        .await
    }

    pub async fn stop_recording(&self, recording_id: &str) -> CommandResult<()> {
        self.call(
            ConnectorOperation::StopRecording,
            self.connector.stop_recording(recording_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorKind;
    use crate::connector::{
        CapabilitySet, ConnectionState, ConnectorInfo, Credentials, DeviceAddress,
    };
    use async_trait::async_trait;

    struct SlowRooms;

    #[async_trait]
    impl Connector for SlowRooms {
        fn info(&self) -> ConnectorInfo {
            ConnectorInfo {
                device_id: "slow".to_string(),
                kind: ConnectorKind::AdobeConnect,
                address: None,
                state: ConnectionState::Connected,
            }
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::of(&[ConnectorOperation::CreateRoom])
        }

        async fn connect(&self, _: &DeviceAddress, _: &Credentials) -> CommandResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> CommandResult<()> {
            Ok(())
        }

        async fn create_room(&self, _room: &Room) -> CommandResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("room".to_string())
        }
    }

    fn room() -> Room {
        crate::execution::RoomSpec::new("slow", 2).to_room(None)
    }

    #[tokio::test]
    async fn test_command_timeout_is_applied() {
        let registry = ConnectorRegistry::new(Duration::from_millis(20));
        registry.register(DeviceId::from("slow"), Arc::new(SlowRooms));

        let handle = registry.get(&DeviceId::from("slow")).unwrap();
        let error = handle.create_room(&room()).await.unwrap_err();
        assert_eq!(error, CommandError::timeout("create_room", 20));
    }

    #[tokio::test]
    async fn test_undeclared_operation_is_rejected_without_calling() {
        let registry = ConnectorRegistry::new(Duration::from_secs(1));
        registry.register(DeviceId::from("slow"), Arc::new(SlowRooms));

        let handle = registry.get(&DeviceId::from("slow")).unwrap();
        assert!(handle.delete_room("1").await.unwrap_err().is_unsupported());
        assert!(registry.get(&DeviceId::from("missing")).is_none());
        assert_eq!(registry.devices(), vec![DeviceId::from("slow")]);
    }
}
