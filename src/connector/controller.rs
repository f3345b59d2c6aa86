//! # Controller Action Channel
//!
//! Connectors reach back to the controller for identity lookups, target folders, room
//! capacities and operator notifications. Failures on this channel are logged and
//! never fail the connector's primary operation; [`ControllerClient`] enforces that.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cache::TtlCache;
use super::error::ControllerError;
use super::types::UserInformation;
use crate::constants::defaults;

/// Text in every supported notification language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub en: String,
    pub cs: String,
}

impl LocalizedText {
    pub fn new(en: impl Into<String>, cs: impl Into<String>) -> Self {
        Self {
            en: en.into(),
            cs: cs.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: LocalizedText,
    pub body: LocalizedText,
}

impl Notification {
    pub fn new(title: LocalizedText, body: LocalizedText) -> Self {
        Self { title, body }
    }

    /// A participant count exceeded the provisioned capacity of a room
    pub fn room_capacity_exceeded(room_name: &str, participants: usize, capacity: u32) -> Self {
        Self::new(
            LocalizedText::new(
                format!("Room {room_name} capacity exceeded"),
                format!("Překročena kapacita místnosti {room_name}"),
            ),
            LocalizedText::new(
                format!(
                    "The room {room_name} has {participants} participants but only {capacity} licenses were reserved."
                ),
                format!(
                    "V místnosti {room_name} je {participants} účastníků, ale rezervováno bylo pouze {capacity} licencí."
                ),
            ),
        )
    }

    /// A recording could not be moved into its managed folder
    pub fn recording_move_failed(
        device_id: &str,
        folder_id: &str,
        file_name: &str,
        error: &str,
    ) -> Self {
        Self::new(
            LocalizedText::new(
                format!("Recording {file_name} could not be moved"),
                format!("Nahrávku {file_name} nebylo možné přesunout"),
            ),
            LocalizedText::new(
                format!(
                    "Moving recording {file_name} from device {device_id} into folder {folder_id} failed: {error}"
                ),
                format!(
                    "Přesun nahrávky {file_name} ze zařízení {device_id} do složky {folder_id} selhal: {error}"
                ),
            ),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControllerAction {
    GetUserInformation { user_id: String },
    FindUserByPrincipalName { principal_name: String },
    /// Recording folder the controller assigned to a device room
    GetRecordingFolder { device_id: String, room_id: String },
    /// Licensed participant capacity of a device room at the current time
    GetRoomCapacity { device_id: String, room_id: String },
    NotifyRoomOwners {
        device_id: String,
        room_id: String,
        notification: Notification,
    },
    NotifyAdministrators { notification: Notification },
}

impl ControllerAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetUserInformation { .. } => "get_user_information",
            Self::FindUserByPrincipalName { .. } => "find_user_by_principal_name",
            Self::GetRecordingFolder { .. } => "get_recording_folder",
            Self::GetRoomCapacity { .. } => "get_room_capacity",
            Self::NotifyRoomOwners { .. } => "notify_room_owners",
            Self::NotifyAdministrators { .. } => "notify_administrators",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControllerReply {
    User { user: UserInformation },
    RecordingFolder { folder_id: Option<String> },
    RoomCapacity { license_count: Option<u32> },
    Acknowledged,
}

/// The channel connectors use to reach the controller
#[async_trait]
pub trait ControllerChannel: Send + Sync {
    async fn perform_controller_action(
        &self,
        action: ControllerAction,
    ) -> Result<ControllerReply, ControllerError>;
}

/// Channel for deployments without a controller; lookups fail and notifications are logged
#[derive(Debug, Default)]
pub struct LoggingController;

#[async_trait]
impl ControllerChannel for LoggingController {
    async fn perform_controller_action(
        &self,
        action: ControllerAction,
    ) -> Result<ControllerReply, ControllerError> {
        match action {
            ControllerAction::NotifyRoomOwners {
                device_id,
                room_id,
                notification,
            } => {
                warn!(
                    device_id = %device_id,
                    room_id = %room_id,
                    title = %notification.title.en,
                    body = %notification.body.en,
                    "📣 Room owner notification"
                );
                Ok(ControllerReply::Acknowledged)
            }
            ControllerAction::NotifyAdministrators { notification } => {
                warn!(
                    title = %notification.title.en,
                    body = %notification.body.en,
                    "📣 Administrator notification"
                );
                Ok(ControllerReply::Acknowledged)
            }
            other => Err(ControllerError::unavailable(format!(
                "no controller configured for {}",
                other.name()
            ))),
        }
    }
}

/// Connector-side controller access with cached identity lookups
///
/// Lookups follow principal name → user id → user profile, each step behind its own
/// bounded TTL cache. Every failure is logged and surfaces as `None`/`false`.
#[derive(Clone)]
pub struct ControllerClient {
    channel: Arc<dyn ControllerChannel>,
    device_id: String,
    user_by_id: Arc<TtlCache<String, UserInformation>>,
    user_id_by_principal: Arc<TtlCache<String, String>>,
}

impl std::fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("device_id", &self.device_id)
            .field("cached_users", &self.user_by_id.len())
            .finish()
    }
}

impl ControllerClient {
    pub fn new(channel: Arc<dyn ControllerChannel>, device_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            channel,
            device_id: device_id.into(),
            user_by_id: Arc::new(TtlCache::new(ttl, defaults::CACHE_CAPACITY)),
            user_id_by_principal: Arc::new(TtlCache::new(ttl, defaults::CACHE_CAPACITY)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub async fn get_user_information(&self, user_id: &str) -> Option<UserInformation> {
        let key = user_id.to_string();
        if let Some(user) = self.user_by_id.get(&key) {
            return Some(user);
        }
        let action = ControllerAction::GetUserInformation {
            user_id: user_id.to_string(),
        };
        match self.perform(action).await {
            Some(ControllerReply::User { user }) => {
                self.remember(&user);
                Some(user)
            }
            Some(_) => {
                self.log_unexpected("get_user_information");
                None
            }
            None => None,
        }
    }

    pub async fn find_user_by_principal_name(&self, principal_name: &str) -> Option<UserInformation> {
        let key = principal_name.to_string();
        if let Some(user_id) = self.user_id_by_principal.get(&key) {
            if let Some(user) = self.user_by_id.get(&user_id) {
                return Some(user);
            }
        }
        let action = ControllerAction::FindUserByPrincipalName {
            principal_name: principal_name.to_string(),
        };
        match self.perform(action).await {
            Some(ControllerReply::User { user }) => {
                self.user_id_by_principal.insert(key, user.user_id.clone());
                self.remember(&user);
                Some(user)
            }
            Some(_) => {
                self.log_unexpected("find_user_by_principal_name");
                None
            }
            None => None,
        }
    }

    pub async fn get_recording_folder(&self, room_id: &str) -> Option<String> {
        let action = ControllerAction::GetRecordingFolder {
            device_id: self.device_id.clone(),
            room_id: room_id.to_string(),
        };
        match self.perform(action).await {
            Some(ControllerReply::RecordingFolder { folder_id }) => folder_id,
            Some(_) => {
                self.log_unexpected("get_recording_folder");
                None
            }
            None => None,
        }
    }

    pub async fn get_room_capacity(&self, room_id: &str) -> Option<u32> {
        let action = ControllerAction::GetRoomCapacity {
            device_id: self.device_id.clone(),
            room_id: room_id.to_string(),
        };
        match self.perform(action).await {
            Some(ControllerReply::RoomCapacity { license_count }) => license_count,
            Some(_) => {
                self.log_unexpected("get_room_capacity");
                None
            }
            None => None,
        }
    }

    pub async fn notify_room_owners(&self, room_id: &str, notification: Notification) -> bool {
        let action = ControllerAction::NotifyRoomOwners {
            device_id: self.device_id.clone(),
            room_id: room_id.to_string(),
            notification,
        };
        self.perform(action).await.is_some()
    }

    pub async fn notify_administrators(&self, notification: Notification) -> bool {
        let action = ControllerAction::NotifyAdministrators { notification };
        self.perform(action).await.is_some()
    }

    fn remember(&self, user: &UserInformation) {
        for principal in &user.principal_names {
            self.user_id_by_principal
                .insert(principal.clone(), user.user_id.clone());
        }
        self.user_by_id.insert(user.user_id.clone(), user.clone());
    }

    async fn perform(&self, action: ControllerAction) -> Option<ControllerReply> {
        let name = action.name();
        debug!(device_id = %self.device_id, action = name, "Performing controller action");
        match self.channel.perform_controller_action(action).await {
            Ok(reply) => Some(reply),
            Err(error) => {
                warn!(
                    device_id = %self.device_id,
                    action = name,
                    error = %error,
                    "⚠️ Controller action failed"
                );
                None
            }
        }
    }

    fn log_unexpected(&self, action: &str) {
        warn!(
            device_id = %self.device_id,
            error = %ControllerError::unexpected_reply(action),
            "⚠️ Controller action failed"
        );
    }
}
