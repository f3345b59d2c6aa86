//! Value types exchanged over the connector command surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base address of a device API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    url: url::Url,
}

impl DeviceAddress {
    pub fn parse(address: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: url::Url::parse(address)?,
        })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Join a path onto the base address
    pub fn join(&self, path: &str) -> Result<url::Url, url::ParseError> {
        self.url.join(path)
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    /// SIP/H.323 URI
    Uri,
    E164,
    RoomName,
    /// Web URL of the room
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias {
    pub kind: AliasKind,
    pub value: String,
}

impl Alias {
    pub fn new(kind: AliasKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn uri(value: impl Into<String>) -> Self {
        Self::new(AliasKind::Uri, value)
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Anyone with the link may enter
    Public,
    /// Guests must be admitted by a host
    #[default]
    Protected,
    /// Only configured participants may enter
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Admin,
    Presenter,
    Participant,
}

/// Participant assigned to a room ahead of time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfiguredParticipant {
    pub user_id: String,
    pub role: ParticipantRole,
}

/// Room command payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Device-side id; `None` until created
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub license_count: u32,
    pub aliases: Vec<Alias>,
    pub participants: Vec<RoomConfiguredParticipant>,
    pub access_mode: AccessMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub alias: Option<String>,
    pub start: Option<DateTime<Utc>>,
}

/// Participant currently present in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomParticipant {
    pub id: String,
    pub room_id: String,
    pub display_name: String,
    pub user_id: Option<String>,
    pub role: Option<ParticipantRole>,
    pub join_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    /// Still resident on the device
    NotProcessed,
    /// Being relocated into managed storage
    Processing,
    /// Relocated and available
    Available,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub recording_folder_id: Option<String>,
    pub name: String,
    pub file_name: Option<String>,
    pub begin_date: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub download_url: Option<String>,
    pub view_url: Option<String>,
    pub state: RecordingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderPermission {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFolder {
    pub id: Option<String>,
    pub name: String,
    /// User id to permission
    pub user_permissions: Vec<(String, FolderPermission)>,
}

impl RecordingFolder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            user_permissions: Vec::new(),
        }
    }
}

/// What a recording captures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecordingTarget {
    /// Room hosted by the recording device itself
    Room(String),
    /// Endpoint the recorder dials
    Alias(Alias),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInformation {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub principal_names: Vec<String>,
}

impl UserInformation {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn primary_principal_name(&self) -> Option<&str> {
        self.principal_names.first().map(String::as_str)
    }
}
