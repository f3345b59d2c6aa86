//! Meeting rooms.

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use super::folders::{sco_id, ScoInfo, PUBLIC_ACCESS};
use super::AdobeInner;
use crate::connector::command::Command;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::HttpExchange;
use crate::connector::types::{
    AccessMode, Alias, AliasKind, ParticipantRole, Room, RoomConfiguredParticipant, RoomParticipant,
    RoomSummary,
};

const URL_SUFFIX_LEN: usize = 10;

fn access_permission(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::Public => "view",
        AccessMode::Protected => "remove",
        AccessMode::Private => "denied",
    }
}

fn access_mode(permission: Option<&str>) -> AccessMode {
    match permission {
        Some("view") => AccessMode::Public,
        Some("denied") => AccessMode::Private,
        _ => AccessMode::Protected,
    }
}

fn role_permission(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Admin => "host",
        ParticipantRole::Presenter => "mini-host",
        ParticipantRole::Participant => "view",
    }
}

fn permission_role(permission: &str) -> Option<ParticipantRole> {
    match permission {
        "host" => Some(ParticipantRole::Admin),
        "mini-host" => Some(ParticipantRole::Presenter),
        "view" => Some(ParticipantRole::Participant),
        _ => None,
    }
}

/// `url-path` requested through a URL alias, reduced to its last path segment
fn requested_url_path(room: &Room) -> Option<String> {
    let alias = room.aliases.iter().find(|alias| alias.kind == AliasKind::Url)?;
    let path = match url::Url::parse(&alias.value) {
        Ok(url) => url.path().to_string(),
        Err(_) => alias.value.clone(),
    };
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

fn generated_url_path(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(URL_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{prefix}{suffix}")
}

impl<H: HttpExchange> AdobeInner<H> {
    pub(crate) async fn create_room(&self, room: &Room) -> CommandResult<String> {
        let folder_id = self.meetings_folder().await?;
        let url_path = requested_url_path(room)
            .unwrap_or_else(|| generated_url_path(&self.settings.url_path_prefix));

        let command = Command::new("sco-update")
            .param("type", "meeting")
            .param("folder-id", folder_id)
            .param("name", room.name.clone())
            .param_opt("description", room.description.clone())
            .param("url-path", url_path.clone());
        let room_id = sco_id(&self.request(command).await?, "sco-update")?;

        self.apply_room_permissions(&room_id, room).await?;
        self.capacities.insert(room_id.clone(), room.license_count);
        info!(
            device_id = %self.device_id,
            room_id = %room_id,
            url_path = %url_path,
            licenses = room.license_count,
            "🏠 Room created"
        );
        Ok(room_id)
    }

    pub(crate) async fn modify_room(&self, room: &Room) -> CommandResult<String> {
        let room_id = room
            .id
            .clone()
            .ok_or_else(|| CommandError::invalid_argument("room to modify has no id"))?;

        let command = Command::new("sco-update")
            .param("sco-id", room_id.clone())
            .param("name", room.name.clone())
            .param_opt("description", room.description.clone())
            .param_opt("url-path", requested_url_path(room));
        self.request(command).await?;

        self.reset_permissions(&room_id).await?;
        self.apply_room_permissions(&room_id, room).await?;
        self.capacities.insert(room_id.clone(), room.license_count);
        self.capacity_notified.remove(&room_id);
        info!(device_id = %self.device_id, room_id = %room_id, "🏠 Room modified");
        Ok(room_id)
    }

    pub(crate) async fn delete_room(&self, room_id: &str) -> CommandResult<()> {
        self.delete_sco(room_id).await?;
        self.capacities.remove(room_id);
        self.capacity_notified.remove(room_id);
        info!(device_id = %self.device_id, room_id = %room_id, "🗑️ Room deleted");
        Ok(())
    }

    async fn apply_room_permissions(&self, room_id: &str, room: &Room) -> CommandResult<()> {
        self.set_permission(room_id, PUBLIC_ACCESS, access_permission(room.access_mode))
            .await?;
        for participant in &room.participants {
            let Some(principal_id) = self.principal_id(&participant.user_id).await? else {
                continue;
            };
            self.set_permission(room_id, &principal_id, role_permission(participant.role))
                .await?;
        }
        Ok(())
    }

    /// Licensed capacity known locally, otherwise asked from the controller
    pub(crate) async fn room_capacity(&self, room_id: &str) -> Option<u32> {
        let known = self.capacities.get(room_id).map(|capacity| *capacity);
        if known.is_some() {
            return known;
        }
        let capacity = self.controller.get_room_capacity(room_id).await?;
        self.capacities.insert(room_id.to_string(), capacity);
        Some(capacity)
    }

    pub(crate) async fn get_room(&self, room_id: &str) -> CommandResult<Room> {
        let info = self.sco_info(room_id).await?;
        if !info.is_meeting() {
            return Err(CommandError::invalid_argument(format!(
                "sco {room_id} is a {}, not a room",
                info.kind
            )));
        }

        let mut aliases = Vec::new();
        if let Some(url_path) = &info.url_path {
            if let Some(url) = self.web_url(url_path).await {
                aliases.push(Alias::new(AliasKind::Url, url));
            }
        }

        let (public, participants) = self.room_permissions(room_id).await?;
        Ok(Room {
            id: Some(info.sco_id),
            name: info.name,
            description: info.description,
            license_count: self.room_capacity(room_id).await.unwrap_or(0),
            aliases,
            participants,
            access_mode: access_mode(public.as_deref()),
        })
    }

    /// Public-access permission and configured participants of a room
    async fn room_permissions(
        &self,
        room_id: &str,
    ) -> CommandResult<(Option<String>, Vec<RoomConfiguredParticipant>)> {
        let response = match self
            .request(Command::new("permissions-info").param("acl-id", room_id))
            .await
        {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok((None, Vec::new())),
            Err(error) => return Err(error),
        };

        let mut public = None;
        let mut participants = Vec::new();
        for principal in response.descendants("principal") {
            let permission = principal.attr("permission-id").unwrap_or_default();
            if principal.attr("principal-id") == Some(PUBLIC_ACCESS) {
                public = Some(permission.to_string()).filter(|p| !p.is_empty());
                continue;
            }
            let Some(role) = permission_role(permission) else {
                continue;
            };
            let Some(login) = principal.child_text("login") else {
                continue;
            };
            match self.user_id_for_login(login).await {
                Some(user_id) => participants.push(RoomConfiguredParticipant { user_id, role }),
                None => debug!(device_id = %self.device_id, login = %login, "Principal without controller user"),
            }
        }
        Ok((public, participants))
    }

    pub(crate) async fn list_rooms(&self) -> CommandResult<Vec<RoomSummary>> {
        let folder_id = self.meetings_folder().await?;
        let rooms = self
            .contents(&folder_id, Some("meeting"))
            .await?
            .into_iter()
            .map(|info: ScoInfo| RoomSummary {
                id: info.sco_id,
                name: info.name,
                description: info.description,
                alias: info.url_path,
                start: info.date_begin,
            })
            .collect();
        Ok(rooms)
    }

    pub(crate) async fn list_room_participants(&self, room_id: &str) -> CommandResult<Vec<RoomParticipant>> {
        let command = Command::new("meeting-usermanager-user-list").param("sco-id", room_id);
        let response = match self.request(command).await {
            Ok(response) => response,
            // Room not running
            Err(error)
                if error.has_code("no-data", None)
                    || error.has_code("no-access", Some("not-available")) =>
            {
                return Ok(Vec::new())
            }
            Err(error) => return Err(error),
        };

        let mut participants = Vec::new();
        for user in response.descendants("userdetail") {
            let Some(id) = user.child_text("user-id") else {
                continue;
            };
            let user_id = match user.child_text("login") {
                Some(login) => self.user_id_for_login(login).await,
                None => None,
            };
            participants.push(RoomParticipant {
                id: id.to_string(),
                room_id: room_id.to_string(),
                display_name: user.child_text("username").unwrap_or_default().to_string(),
                user_id,
                role: user.child_text("role").and_then(|role| match role {
                    "host" => Some(ParticipantRole::Admin),
                    "presenter" | "mini-host" => Some(ParticipantRole::Presenter),
                    "viewer" | "participant" => Some(ParticipantRole::Participant),
                    _ => None,
                }),
                join_time: None,
            });
        }
        Ok(participants)
    }

    pub(crate) async fn disconnect_participant(&self, room_id: &str, participant_id: &str) -> CommandResult<()> {
        self.request(
            Command::new("meeting-usermanager-remove-user")
                .param("sco-id", room_id)
                .param("user-id", participant_id),
        )
        .await?;
        info!(device_id = %self.device_id, room_id = %room_id, participant_id = %participant_id, "👋 Participant disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with_alias(value: &str) -> Room {
        Room {
            id: None,
            name: "Weekly".into(),
            description: None,
            license_count: 5,
            aliases: vec![Alias::new(AliasKind::Url, value)],
            participants: Vec::new(),
            access_mode: AccessMode::Protected,
        }
    }

    #[test]
    fn test_url_path_from_alias() {
        assert_eq!(
            requested_url_path(&room_with_alias("https://connect.example.org/weekly-sync/")).as_deref(),
            Some("weekly-sync")
        );
        assert_eq!(
            requested_url_path(&room_with_alias("/weekly-sync")).as_deref(),
            Some("weekly-sync")
        );
    }

    #[test]
    fn test_generated_url_path() {
        let path = generated_url_path("broker-");
        assert!(path.starts_with("broker-"));
        assert_eq!(path.len(), "broker-".len() + URL_SUFFIX_LEN);
        assert!(path.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_permission_mappings() {
        for mode in [AccessMode::Public, AccessMode::Protected, AccessMode::Private] {
            assert_eq!(access_mode(Some(access_permission(mode))), mode);
        }
        assert_eq!(access_mode(None), AccessMode::Protected);
        for role in [ParticipantRole::Admin, ParticipantRole::Presenter, ParticipantRole::Participant] {
            assert_eq!(permission_role(role_permission(role)), Some(role));
        }
    }
}
