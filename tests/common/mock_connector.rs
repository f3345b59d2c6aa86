use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use conference_broker::config::ConnectorKind;
use conference_broker::connector::{
    Alias, CapabilitySet, CommandError, CommandResult, ConnectionState, Connector, ConnectorInfo,
    ConnectorOperation, Credentials, DeviceAddress, RecordingFolder, RecordingTarget, Room,
};

/// Connector recording every command it receives, as `operation:argument`
pub struct MockConnector {
    device_id: String,
    capabilities: CapabilitySet,
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<(ConnectorOperation, CommandError)>>,
    sequence: AtomicUsize,
}

impl MockConnector {
    pub fn new(device_id: &str) -> Self {
        Self::with_capabilities(device_id, CapabilitySet::all())
    }

    pub fn with_capabilities(device_id: &str, capabilities: CapabilitySet) -> Self {
        Self {
            device_id: device_id.to_string(),
            capabilities,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            sequence: AtomicUsize::new(0),
        }
    }

    /// Make every following call of `operation` fail with `error`
    pub fn fail_on(&self, operation: ConnectorOperation, error: CommandError) {
        self.failures.lock().push((operation, error));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, operation: &str) -> Vec<String> {
        let prefix = format!("{operation}:");
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(&prefix))
            .collect()
    }

    fn record(&self, operation: ConnectorOperation, argument: &str) -> CommandResult<()> {
        self.calls.lock().push(format!("{operation}:{argument}"));
        let failure = self
            .failures
            .lock()
            .iter()
            .find(|(failing, _)| *failing == operation)
            .map(|(_, error)| error.clone());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&self, kind: &str) -> String {
        format!("{kind}-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            device_id: self.device_id.clone(),
            kind: ConnectorKind::AdobeConnect,
            address: None,
            state: ConnectionState::Connected,
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn connect(&self, _address: &DeviceAddress, _credentials: &Credentials) -> CommandResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> CommandResult<()> {
        Ok(())
    }

    async fn create_room(&self, room: &Room) -> CommandResult<String> {
        self.record(ConnectorOperation::CreateRoom, &room.name)?;
        Ok(self.next_id("room"))
    }

    async fn modify_room(&self, room: &Room) -> CommandResult<String> {
        let room_id = room.id.clone().unwrap_or_default();
        self.record(ConnectorOperation::ModifyRoom, &room_id)?;
        Ok(room_id)
    }

    async fn delete_room(&self, room_id: &str) -> CommandResult<()> {
        self.record(ConnectorOperation::DeleteRoom, room_id)
    }

    async fn add_room_participants(&self, room_id: &str, aliases: &[Alias]) -> CommandResult<Vec<String>> {
        self.record(ConnectorOperation::AddRoomParticipants, room_id)?;
        Ok(aliases.iter().map(|_| self.next_id("participant")).collect())
    }

    async fn disconnect_participant(&self, _room_id: &str, participant_id: &str) -> CommandResult<()> {
        self.record(ConnectorOperation::DisconnectParticipant, participant_id)
    }

    async fn create_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<String> {
        self.record(ConnectorOperation::CreateRecordingFolder, &folder.name)?;
        Ok(self.next_id("folder"))
    }

    async fn start_recording(&self, folder_id: &str, target: &RecordingTarget) -> CommandResult<String> {
        let target = match target {
            RecordingTarget::Room(room_id) => room_id.clone(),
            RecordingTarget::Alias(alias) => alias.value.clone(),
        };
        self.record(ConnectorOperation::StartRecording, &format!("{folder_id}@{target}"))?;
        Ok(self.next_id("recording"))
    }

    async fn stop_recording(&self, recording_id: &str) -> CommandResult<()> {
        self.record(ConnectorOperation::StopRecording, recording_id)
    }
}
