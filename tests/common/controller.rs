use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use conference_broker::connector::{
    ControllerAction, ControllerChannel, ControllerError, ControllerReply, Notification, UserInformation,
};

/// Controller double answering lookups from fixed tables and keeping every action
#[derive(Default)]
pub struct RecordingController {
    actions: Mutex<Vec<ControllerAction>>,
    users: Mutex<HashMap<String, UserInformation>>,
    recording_folders: Mutex<HashMap<String, String>>,
    capacities: Mutex<HashMap<String, u32>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user_id: &str, principal_name: &str) -> Self {
        self.users.lock().insert(
            user_id.to_string(),
            UserInformation {
                user_id: user_id.to_string(),
                first_name: "Test".to_string(),
                last_name: format!("User {user_id}"),
                email: None,
                principal_names: vec![principal_name.to_string()],
            },
        );
        self
    }

    pub fn with_recording_folder(self, room_id: &str, folder_id: &str) -> Self {
        self.recording_folders
            .lock()
            .insert(room_id.to_string(), folder_id.to_string());
        self
    }

    pub fn with_capacity(self, room_id: &str, license_count: u32) -> Self {
        self.capacities.lock().insert(room_id.to_string(), license_count);
        self
    }

    pub fn actions(&self) -> Vec<ControllerAction> {
        self.actions.lock().clone()
    }

    pub fn room_owner_notifications(&self) -> Vec<(String, Notification)> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                ControllerAction::NotifyRoomOwners {
                    room_id, notification, ..
                } => Some((room_id, notification)),
                _ => None,
            })
            .collect()
    }

    pub fn administrator_notifications(&self) -> Vec<Notification> {
        self.actions()
            .into_iter()
            .filter_map(|action| match action {
                ControllerAction::NotifyAdministrators { notification } => Some(notification),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ControllerChannel for RecordingController {
    async fn perform_controller_action(
        &self,
        action: ControllerAction,
    ) -> Result<ControllerReply, ControllerError> {
        self.actions.lock().push(action.clone());
        match action {
            ControllerAction::GetUserInformation { user_id } => self
                .users
                .lock()
                .get(&user_id)
                .cloned()
                .map(|user| ControllerReply::User { user })
                .ok_or_else(|| ControllerError::rejected("get_user_information", "unknown user")),
            ControllerAction::FindUserByPrincipalName { principal_name } => self
                .users
                .lock()
                .values()
                .find(|user| user.principal_names.contains(&principal_name))
                .cloned()
                .map(|user| ControllerReply::User { user })
                .ok_or_else(|| ControllerError::rejected("find_user_by_principal_name", "unknown principal")),
            ControllerAction::GetRecordingFolder { room_id, .. } => Ok(ControllerReply::RecordingFolder {
                folder_id: self.recording_folders.lock().get(&room_id).cloned(),
            }),
            ControllerAction::GetRoomCapacity { room_id, .. } => Ok(ControllerReply::RoomCapacity {
                license_count: self.capacities.lock().get(&room_id).copied(),
            }),
            ControllerAction::NotifyRoomOwners { .. } | ControllerAction::NotifyAdministrators { .. } => {
                Ok(ControllerReply::Acknowledged)
            }
        }
    }
}
