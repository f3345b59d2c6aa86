//! # Executables
//!
//! A provisionable unit (room, connection, compartment, recording service) with the time
//! slot it must exist in, its child dependencies and the trail of failures it collected.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::connector::{AccessMode, Alias, CommandError, Room, RoomConfiguredParticipant};

/// Executable identity; ascending order is declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutableId(pub u64);

impl fmt::Display for ExecutableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exe:{}", self.0)
    }
}

/// Identity of a managed device (one connector per device)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Executable lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableState {
    /// Scheduled, nothing provisioned yet
    #[default]
    NotStarted,
    /// Provisioned on its device
    Started,
    /// Being re-provisioned to a new specification or device
    Migrating,
    /// Teardown issued but not confirmed
    Stopping,
    /// Torn down
    Stopped,
    /// A start or stop command failed, see the state report
    Failed,
}

impl ExecutableState {
    /// Whether device resources may exist for the executable
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Migrating | Self::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for ExecutableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Started => write!(f, "started"),
            Self::Migrating => write!(f, "migrating"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutableState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "started" => Ok(Self::Started),
            "migrating" => Ok(Self::Migrating),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid executable state: {s}")),
        }
    }
}

/// Half-open interval `[start, end)` during which an executable should exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, duration: ChronoDuration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn duration(&self) -> ChronoDuration {
        self.end - self.start
    }
}

/// Room provisioned on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEndpoint {
    pub device: DeviceId,
    pub room: RoomSpec,
}

/// Desired room settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSpec {
    pub name: String,
    pub description: Option<String>,
    /// Provisioned participant capacity
    pub license_count: u32,
    pub aliases: Vec<Alias>,
    pub participants: Vec<RoomConfiguredParticipant>,
    pub access_mode: AccessMode,
}

impl RoomSpec {
    pub fn new(name: impl Into<String>, license_count: u32) -> Self {
        Self {
            name: name.into(),
            description: None,
            license_count,
            aliases: Vec::new(),
            participants: Vec::new(),
            access_mode: AccessMode::default(),
        }
    }

    /// Room command payload, with the device-side id when the room already exists
    pub fn to_room(&self, id: Option<String>) -> Room {
        Room {
            id,
            name: self.name.clone(),
            description: self.description.clone(),
            license_count: self.license_count,
            aliases: self.aliases.clone(),
            participants: self.participants.clone(),
            access_mode: self.access_mode,
        }
    }
}

/// Endpoint dialled into a room executable (the room is a child)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub room: ExecutableId,
    pub alias: Alias,
}

/// Recording of a room executable on a recording device (the room is a child)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingService {
    pub room: ExecutableId,
    pub device: DeviceId,
    pub folder_name: String,
}

/// Closed set of executable variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableKind {
    Room(RoomEndpoint),
    Connection(ConnectionSpec),
    Compartment,
    Recording(RecordingService),
}

impl ExecutableKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Room(_) => "room",
            Self::Connection(_) => "connection",
            Self::Compartment => "compartment",
            Self::Recording(_) => "recording",
        }
    }
}

/// Which part of execution a report entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Start,
    Stop,
    Update,
    Migrate,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Update => write!(f, "update"),
            Self::Migrate => write!(f, "migrate"),
        }
    }
}

/// One failure recorded against an executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub at: DateTime<Utc>,
    pub phase: ExecutionPhase,
    /// Error taxonomy name (`failed`, `unsupported`, `timeout`, `dependency` ...)
    pub kind: String,
    pub code: Option<String>,
    pub sub_code: Option<String>,
    pub message: String,
}

impl ReportEntry {
    pub fn from_command_error(at: DateTime<Utc>, phase: ExecutionPhase, error: &CommandError) -> Self {
        Self {
            at,
            phase,
            kind: error.kind().to_string(),
            code: error.code().map(str::to_string),
            sub_code: error.sub_code().map(str::to_string),
            message: error.to_string(),
        }
    }

    /// Migration cut short before its outcome was persisted
    pub fn interrupted(at: DateTime<Utc>, phase: ExecutionPhase, message: impl Into<String>) -> Self {
        Self {
            at,
            phase,
            kind: "interrupted".to_string(),
            code: None,
            sub_code: None,
            message: message.into(),
        }
    }

    pub fn dependency(at: DateTime<Utc>, phase: ExecutionPhase, message: impl Into<String>) -> Self {
        Self {
            at,
            phase,
            kind: "dependency".to_string(),
            code: None,
            sub_code: None,
            message: message.into(),
        }
    }
}

/// Structured failure trail, newest last
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    entries: Vec<ReportEntry>,
}

impl StateReport {
    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ReportEntry> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    pub id: ExecutableId,
    pub slot: Slot,
    pub state: ExecutableState,
    pub kind: ExecutableKind,
    /// Dependencies that must be started before this executable
    pub children: Vec<ExecutableId>,
    /// Bumped whenever the persisted specification changes
    pub revision: u64,
    /// Revision live on the device
    pub applied_revision: u64,
    /// Revision whose update or migration failed; not retried until the revision changes
    pub failed_revision: Option<u64>,
    /// Specification live on the device
    pub applied_kind: Option<ExecutableKind>,
    /// Device-side handle (room id, participant id, recording id)
    pub resource_id: Option<String>,
    /// Recording folder created for a recording service
    pub recording_folder_id: Option<String>,
    pub report: StateReport,
}

impl Executable {
    pub fn new(id: ExecutableId, slot: Slot, kind: ExecutableKind) -> Self {
        Self {
            id,
            slot,
            state: ExecutableState::NotStarted,
            kind,
            children: Vec::new(),
            revision: 1,
            applied_revision: 0,
            failed_revision: None,
            applied_kind: None,
            resource_id: None,
            recording_folder_id: None,
            report: StateReport::default(),
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = ExecutableId>) -> Self {
        self.children = children.into_iter().collect();
        self
    }

    /// Replace the specification; a started executable is then updated or migrated
    pub fn update_kind(&mut self, kind: ExecutableKind) {
        if self.kind != kind {
            self.kind = kind;
            self.revision += 1;
        }
    }

    /// Started, with a specification the device has not seen and has not already rejected
    pub fn needs_update(&self) -> bool {
        self.state == ExecutableState::Started
            && self.revision != self.applied_revision
            && self.failed_revision != Some(self.revision)
    }

    /// Record the current specification as live on the device
    pub fn mark_applied(&mut self) {
        self.applied_revision = self.revision;
        self.applied_kind = Some(self.kind.clone());
        self.failed_revision = None;
    }

    /// Room executable a connection or recording service works on
    pub fn referenced_room(&self) -> Option<ExecutableId> {
        match &self.kind {
            ExecutableKind::Connection(connection) => Some(connection.room),
            ExecutableKind::Recording(service) => Some(service.room),
            ExecutableKind::Room(_) | ExecutableKind::Compartment => None,
        }
    }

    /// Children plus the referenced room, without duplicates
    pub fn dependencies(&self) -> Vec<ExecutableId> {
        let mut dependencies = self.children.clone();
        if let Some(room) = self.referenced_room() {
            if !dependencies.contains(&room) {
                dependencies.push(room);
            }
        }
        dependencies
    }

    /// Device a command for this executable goes to, when it has its own
    pub fn own_device(&self) -> Option<&DeviceId> {
        match &self.kind {
            ExecutableKind::Room(endpoint) => Some(&endpoint.device),
            ExecutableKind::Recording(service) => Some(&service.device),
            ExecutableKind::Connection(_) | ExecutableKind::Compartment => None,
        }
    }
}
