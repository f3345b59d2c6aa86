//! Statically declared connector capabilities.
//!
//! Every command of the uniform surface has a [`ConnectorOperation`]; each connector
//! variant declares the operations it implements as a [`CapabilitySet`] so callers can
//! ask "can this device record?" without a round trip.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorOperation {
    CreateRoom,
    ModifyRoom,
    DeleteRoom,
    GetRoom,
    ListRooms,
    AddRoomParticipants,
    ListRoomParticipants,
    DisconnectParticipant,
    CreateRecordingFolder,
    ModifyRecordingFolder,
    DeleteRecordingFolder,
    StartRecording,
    StopRecording,
    DeleteRecording,
    ListRecordings,
    GetActiveRecording,
    IsRecordingActive,
}

impl ConnectorOperation {
    pub const ALL: [ConnectorOperation; 17] = [
        Self::CreateRoom,
        Self::ModifyRoom,
        Self::DeleteRoom,
        Self::GetRoom,
        Self::ListRooms,
        Self::AddRoomParticipants,
        Self::ListRoomParticipants,
        Self::DisconnectParticipant,
        Self::CreateRecordingFolder,
        Self::ModifyRecordingFolder,
        Self::DeleteRecordingFolder,
        Self::StartRecording,
        Self::StopRecording,
        Self::DeleteRecording,
        Self::ListRecordings,
        Self::GetActiveRecording,
        Self::IsRecordingActive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRoom => "create_room",
            Self::ModifyRoom => "modify_room",
            Self::DeleteRoom => "delete_room",
            Self::GetRoom => "get_room",
            Self::ListRooms => "list_rooms",
            Self::AddRoomParticipants => "add_room_participants",
            Self::ListRoomParticipants => "list_room_participants",
            Self::DisconnectParticipant => "disconnect_participant",
            Self::CreateRecordingFolder => "create_recording_folder",
            Self::ModifyRecordingFolder => "modify_recording_folder",
            Self::DeleteRecordingFolder => "delete_recording_folder",
            Self::StartRecording => "start_recording",
            Self::StopRecording => "stop_recording",
            Self::DeleteRecording => "delete_recording",
            Self::ListRecordings => "list_recordings",
            Self::GetActiveRecording => "get_active_recording",
            Self::IsRecordingActive => "is_recording_active",
        }
    }

    const fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for ConnectorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bit set of supported operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self::of(&ConnectorOperation::ALL)
    }

    pub const fn of(operations: &[ConnectorOperation]) -> Self {
        let mut bits = 0;
        let mut index = 0;
        while index < operations.len() {
            bits |= operations[index].bit();
            index += 1;
        }
        Self(bits)
    }

    pub const fn with(self, operation: ConnectorOperation) -> Self {
        Self(self.0 | operation.bit())
    }

    pub const fn supports(&self, operation: ConnectorOperation) -> bool {
        self.0 & operation.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = ConnectorOperation> + '_ {
        ConnectorOperation::ALL
            .into_iter()
            .filter(move |operation| self.supports(*operation))
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<ConnectorOperation> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = ConnectorOperation>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |set, operation| set.with(operation))
    }
}
