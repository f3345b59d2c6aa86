//! Folder resolution, SCO lookups, principals and permissions.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::AdobeInner;
use crate::connector::command::Command;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::HttpExchange;
use crate::connector::types::FolderPermission;
use crate::connector::xml::XmlElement;

pub(crate) const PUBLIC_ACCESS: &str = "public-access";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FolderRole {
    Meetings,
    Recordings,
}

impl FolderRole {
    /// Shared shortcut the folder is created under
    fn shortcut(&self) -> &'static str {
        match self {
            Self::Meetings => "meetings",
            Self::Recordings => "content",
        }
    }
}

/// Folder ids resolved during the current session
#[derive(Debug, Default)]
pub(crate) struct FolderCache {
    meetings: Option<String>,
    recordings: Option<String>,
}

impl FolderCache {
    fn get(&self, role: FolderRole) -> Option<&String> {
        match role {
            FolderRole::Meetings => self.meetings.as_ref(),
            FolderRole::Recordings => self.recordings.as_ref(),
        }
    }

    fn set(&mut self, role: FolderRole, id: String) {
        match role {
            FolderRole::Meetings => self.meetings = Some(id),
            FolderRole::Recordings => self.recordings = Some(id),
        }
    }

    pub fn clear(&mut self) {
        self.meetings = None;
        self.recordings = None;
    }
}

/// Subset of `sco-info` every caller needs
#[derive(Debug, Clone)]
pub(crate) struct ScoInfo {
    pub sco_id: String,
    /// Parent folder or room
    pub folder_id: Option<String>,
    pub kind: String,
    pub icon: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub url_path: Option<String>,
    pub date_begin: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
}

impl ScoInfo {
    pub fn from_element(sco: &XmlElement) -> CommandResult<Self> {
        let sco_id = sco
            .attr("sco-id")
            .ok_or_else(|| CommandError::parse("sco element without sco-id"))?
            .to_string();
        Ok(Self {
            sco_id,
            folder_id: sco.attr("folder-id").filter(|id| !id.is_empty()).map(str::to_string),
            kind: sco.attr("type").unwrap_or_default().to_string(),
            icon: sco.attr("icon").map(str::to_string),
            name: sco.child_text("name").unwrap_or_default().to_string(),
            description: sco.child_text("description").map(str::to_string),
            url_path: sco.child_text("url-path").map(str::to_string),
            date_begin: sco.child_text("date-begin").and_then(parse_date),
            duration_secs: sco
                .attr("duration")
                .or_else(|| sco.child_text("duration"))
                .and_then(|value| value.parse().ok()),
        })
    }

    pub fn is_meeting(&self) -> bool {
        self.kind == "meeting"
    }

    pub fn is_folder(&self) -> bool {
        self.kind == "folder"
    }
}

pub(crate) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

impl<H: HttpExchange> AdobeInner<H> {
    pub(crate) async fn meetings_folder(&self) -> CommandResult<String> {
        self.resolve_folder(FolderRole::Meetings).await
    }

    pub(crate) async fn recordings_folder(&self) -> CommandResult<String> {
        self.resolve_folder(FolderRole::Recordings).await
    }

    /// Find the folder by name under its shortcut, creating it only when absent
    async fn resolve_folder(&self, role: FolderRole) -> CommandResult<String> {
        let mut cache = self.folders.lock().await;
        if let Some(id) = cache.get(role) {
            return Ok(id.clone());
        }

        let name = match role {
            FolderRole::Meetings => &self.settings.meetings_folder_name,
            FolderRole::Recordings => &self.settings.recordings_folder_name,
        };
        let parent = self.shortcut(role.shortcut()).await?;
        let id = match self.find_child(&parent, name, "folder").await? {
            Some(id) => id,
            None => {
                let id = self.create_folder(&parent, name).await?;
                info!(device_id = %self.device_id, folder = %name, folder_id = %id, "📁 Created managed folder");
                id
            }
        };

        if role == FolderRole::Recordings {
            self.ensure_not_public(&id).await?;
        }
        cache.set(role, id.clone());
        Ok(id)
    }

    async fn shortcut(&self, kind: &str) -> CommandResult<String> {
        let response = self.request(Command::new("sco-shortcuts")).await?;
        response
            .descendants("sco")
            .into_iter()
            .find(|sco| sco.attr("type") == Some(kind))
            .and_then(|sco| sco.attr("sco-id"))
            .map(str::to_string)
            .ok_or_else(|| CommandError::protocol(format!("device has no '{kind}' shortcut")))
    }

    /// Child of `parent` with the given name and type
    pub(crate) async fn find_child(&self, parent: &str, name: &str, kind: &str) -> CommandResult<Option<String>> {
        let command = Command::new("sco-contents")
            .param("sco-id", parent)
            .param("filter-name", name);
        let response = match self.request(command).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok(None),
            Err(error) => return Err(error),
        };
        Ok(response
            .descendants("sco")
            .into_iter()
            .filter(|sco| sco.attr("type") == Some(kind))
            .find(|sco| sco.child_text("name") == Some(name))
            .and_then(|sco| sco.attr("sco-id"))
            .map(str::to_string))
    }

    pub(crate) async fn create_folder(&self, parent: &str, name: &str) -> CommandResult<String> {
        let command = Command::new("sco-update")
            .param("type", "folder")
            .param("name", name)
            .param("folder-id", parent);
        let response = self.request(command).await?;
        sco_id(&response, "sco-update")
    }

    /// Children of a folder, optionally filtered by type
    pub(crate) async fn contents(&self, folder_id: &str, kind: Option<&str>) -> CommandResult<Vec<ScoInfo>> {
        let command = Command::new("sco-contents")
            .param("sco-id", folder_id)
            .param_opt("filter-type", kind);
        let response = match self.request(command).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        response
            .descendants("sco")
            .into_iter()
            .map(ScoInfo::from_element)
            .collect()
    }

    pub(crate) async fn sco_info(&self, sco_id: &str) -> CommandResult<ScoInfo> {
        let response = self
            .request(Command::new("sco-info").param("sco-id", sco_id))
            .await?;
        let sco = response
            .find("sco")
            .ok_or_else(|| CommandError::parse("sco-info response without sco"))?;
        ScoInfo::from_element(sco)
    }

    pub(crate) async fn delete_sco(&self, sco_id: &str) -> CommandResult<()> {
        self.request(Command::new("sco-delete").param("sco-id", sco_id))
            .await?;
        debug!(device_id = %self.device_id, sco_id = %sco_id, "SCO deleted");
        Ok(())
    }

    pub(crate) async fn move_sco(&self, sco_id: &str, folder_id: &str) -> CommandResult<()> {
        self.request(
            Command::new("sco-move")
                .param("sco-id", sco_id)
                .param("folder-id", folder_id),
        )
        .await?;
        info!(device_id = %self.device_id, sco_id = %sco_id, folder_id = %folder_id, "📦 SCO moved");
        Ok(())
    }

    /// Current public-access permission of an ACL
    pub(crate) async fn public_permission(&self, acl_id: &str) -> CommandResult<Option<String>> {
        let command = Command::new("permissions-info")
            .param("acl-id", acl_id)
            .param("filter-principal-id", PUBLIC_ACCESS);
        let response = match self.request(command).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok(None),
            Err(error) => return Err(error),
        };
        Ok(response
            .descendants("principal")
            .into_iter()
            .find(|principal| principal.attr("principal-id") == Some(PUBLIC_ACCESS))
            .and_then(|principal| principal.attr("permission-id"))
            .filter(|permission| !permission.is_empty())
            .map(str::to_string))
    }

    pub(crate) async fn set_permission(&self, acl_id: &str, principal_id: &str, permission: &str) -> CommandResult<()> {
        self.request(
            Command::new("permissions-update")
                .param("acl-id", acl_id)
                .param("principal-id", principal_id)
                .param("permission-id", permission),
        )
        .await
        .map(|_| ())
    }

    pub(crate) async fn reset_permissions(&self, acl_id: &str) -> CommandResult<()> {
        self.request(Command::new("permissions-reset").param("acl-id", acl_id))
            .await
            .map(|_| ())
    }

    /// Deny public access when the folder is found open
    async fn ensure_not_public(&self, folder_id: &str) -> CommandResult<()> {
        let current = self.public_permission(folder_id).await?;
        if current.as_deref() != Some("denied") {
            warn!(
                device_id = %self.device_id,
                folder_id = %folder_id,
                permission = current.as_deref().unwrap_or("inherited"),
                "🔒 Recordings folder was public, denying access"
            );
            self.set_permission(folder_id, PUBLIC_ACCESS, "denied").await?;
        }
        Ok(())
    }

    /// Principal id of a controller user, looked up by login
    pub(crate) async fn principal_id(&self, user_id: &str) -> CommandResult<Option<String>> {
        let Some(user) = self.controller.get_user_information(user_id).await else {
            warn!(device_id = %self.device_id, user_id = %user_id, "⚠️ Unknown user, skipping");
            return Ok(None);
        };
        let Some(login) = user.primary_principal_name() else {
            return Ok(None);
        };
        let login = login.to_string();
        if let Some(principal_id) = self.principals.get(&login) {
            return Ok(Some(principal_id));
        }

        let command = Command::new("principal-list").param("filter-login", login.clone());
        let response = match self.request(command).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok(None),
            Err(error) => return Err(error),
        };
        let principal_id = response
            .descendants("principal")
            .into_iter()
            .find(|principal| principal.child_text("login") == Some(login.as_str()))
            .and_then(|principal| principal.attr("principal-id"))
            .map(str::to_string);
        if let Some(principal_id) = &principal_id {
            self.principals.insert(login, principal_id.clone());
        }
        Ok(principal_id)
    }

    /// Controller user id behind a device login
    pub(crate) async fn user_id_for_login(&self, login: &str) -> Option<String> {
        self.controller
            .find_user_by_principal_name(login)
            .await
            .map(|user| user.user_id)
    }

    pub(crate) async fn apply_folder_permissions(
        &self,
        folder_id: &str,
        permissions: &[(String, FolderPermission)],
    ) -> CommandResult<()> {
        self.set_permission(folder_id, PUBLIC_ACCESS, "denied").await?;
        for (user_id, permission) in permissions {
            let Some(principal_id) = self.principal_id(user_id).await? else {
                continue;
            };
            let permission = match permission {
                FolderPermission::Read => "view",
                FolderPermission::Write => "manage",
            };
            self.set_permission(folder_id, &principal_id, permission).await?;
        }
        Ok(())
    }
}

/// `sco-id` attribute of the `sco` element in a response
pub(crate) fn sco_id(response: &XmlElement, action: &str) -> CommandResult<String> {
    response
        .find("sco")
        .and_then(|sco| sco.attr("sco-id"))
        .map(str::to_string)
        .ok_or_else(|| CommandError::parse(format!("{action} response without sco-id")))
}
