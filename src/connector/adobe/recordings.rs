//! Recording folders and in-room recordings.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::folders::ScoInfo;
use super::{ActiveRecording, AdobeInner};
use crate::connector::command::Command;
use crate::connector::controller::Notification;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::HttpExchange;
use crate::connector::types::{Recording, RecordingFolder, RecordingState, RecordingTarget};
use crate::connector::xml::XmlElement;

fn room_target(target: &RecordingTarget) -> CommandResult<&str> {
    match target {
        RecordingTarget::Room(room_id) => Ok(room_id),
        RecordingTarget::Alias(alias) => Err(CommandError::invalid_argument(format!(
            "rooms record themselves, cannot dial {alias}"
        ))),
    }
}

/// Recording currently produced in the room, if any
fn recorded_sco(response: &XmlElement) -> Option<String> {
    response
        .find("recording-sco-id")
        .map(|element| element.text.clone())
        .filter(|id| !id.is_empty())
}

impl<H: HttpExchange> AdobeInner<H> {
    pub(crate) async fn create_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<String> {
        let parent = self.recordings_folder().await?;
        let folder_id = self.create_folder(&parent, &folder.name).await?;
        self.apply_folder_permissions(&folder_id, &folder.user_permissions)
            .await?;
        info!(device_id = %self.device_id, folder_id = %folder_id, name = %folder.name, "📁 Recording folder created");
        Ok(folder_id)
    }

    pub(crate) async fn modify_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<()> {
        let folder_id = folder
            .id
            .as_deref()
            .ok_or_else(|| CommandError::invalid_argument("recording folder to modify has no id"))?;
        self.request(
            Command::new("sco-update")
                .param("sco-id", folder_id)
                .param("name", folder.name.clone()),
        )
        .await?;
        self.reset_permissions(folder_id).await?;
        self.apply_folder_permissions(folder_id, &folder.user_permissions)
            .await
    }

    async fn recorder_activity(&self, room_id: &str) -> CommandResult<Option<String>> {
        let response = self
            .request(Command::new("meeting-recorder-activity-info").param("sco-id", room_id))
            .await?;
        Ok(recorded_sco(&response))
    }

    async fn set_recorder_active(&self, room_id: &str, active: bool, name: Option<String>) -> CommandResult<()> {
        self.request(
            Command::new("meeting-recorder-activity-update")
                .param("sco-id", room_id)
                .param("active", active.to_string())
                .param_opt("name", name),
        )
        .await
        .map(|_| ())
    }

    /// Start the room recorder and wait until the device reports the recording id
    pub(crate) async fn start_recording(&self, folder_id: &str, target: &RecordingTarget) -> CommandResult<String> {
        let room_id = room_target(target)?;
        let name = format!(
            "{}{}_{}",
            self.settings.recordings_prefix,
            room_id,
            Utc::now().format("%Y%m%d%H%M%S")
        );
        self.set_recorder_active(room_id, true, Some(name.clone()))
            .await?;

        for attempt in 1..=self.settings.recording_poll_attempts {
            if let Some(recording_id) = self.recorder_activity(room_id).await? {
                self.active_recordings.insert(
                    recording_id.clone(),
                    ActiveRecording {
                        room_id: room_id.to_string(),
                        folder_id: folder_id.to_string(),
                    },
                );
                info!(
                    device_id = %self.device_id,
                    room_id = %room_id,
                    recording_id = %recording_id,
                    name = %name,
                    "🔴 Recording started"
                );
                return Ok(recording_id);
            }
            debug!(device_id = %self.device_id, room_id = %room_id, attempt, "Recording id not reported yet");
            tokio::time::sleep(self.settings.recording_poll_interval).await;
        }

        Err(CommandError::failed(
            "meeting-recorder-activity-info",
            "recording-unavailable",
            None,
            format!(
                "room {room_id} reported no recording after {} attempts",
                self.settings.recording_poll_attempts
            ),
        ))
    }

    /// Stop the recorder and move the recording into its folder.
    ///
    /// The move completes before this returns: deleting the room afterwards deletes every
    /// recording still inside it.
    pub(crate) async fn stop_recording(&self, recording_id: &str) -> CommandResult<()> {
        let active = self
            .active_recordings
            .get(recording_id)
            .map(|active| active.clone());
        let room_id = match &active {
            Some(active) => active.room_id.clone(),
            None => self
                .sco_info(recording_id)
                .await?
                .folder_id
                .ok_or_else(|| CommandError::invalid_argument(format!("recording {recording_id} is not in a room")))?,
        };

        self.set_recorder_active(&room_id, false, None).await?;
        self.active_recordings.remove(recording_id);
        info!(device_id = %self.device_id, room_id = %room_id, recording_id = %recording_id, "⏹️ Recording stopped");

        let Some(active) = active else {
            // Unknown folder, left to the reconciliation loop
            return Ok(());
        };
        self.relocate(recording_id, &active.folder_id).await;
        Ok(())
    }

    /// Move a recording into `folder_id`, alerting administrators on failure
    pub(crate) async fn relocate(&self, recording_id: &str, folder_id: &str) -> bool {
        match self.move_sco(recording_id, folder_id).await {
            Ok(()) => {
                self.stored_recordings.insert(recording_id.to_string(), ());
                true
            }
            Err(error) => {
                warn!(
                    device_id = %self.device_id,
                    recording_id = %recording_id,
                    folder_id = %folder_id,
                    error = %error,
                    "❌ Moving recording failed"
                );
                self.controller
                    .notify_administrators(Notification::recording_move_failed(
                        &self.device_id,
                        folder_id,
                        recording_id,
                        &error.to_string(),
                    ))
                    .await;
                false
            }
        }
    }

    async fn to_recording(&self, info: ScoInfo) -> Recording {
        let view_url = match &info.url_path {
            Some(url_path) => self.web_url(url_path).await,
            None => None,
        };
        let state = if self.active_recordings.contains_key(&info.sco_id) {
            RecordingState::NotProcessed
        } else {
            RecordingState::Available
        };
        Recording {
            id: info.sco_id,
            recording_folder_id: info.folder_id,
            name: info.name,
            file_name: None,
            begin_date: info.date_begin,
            duration_secs: info.duration_secs,
            download_url: None,
            view_url,
            state,
        }
    }

    pub(crate) async fn list_recordings(&self, folder_id: &str) -> CommandResult<Vec<Recording>> {
        let command = Command::new("sco-contents")
            .param("sco-id", folder_id)
            .param("filter-icon", "archive");
        let response = match self.request(command).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        let mut recordings = Vec::new();
        for sco in response.descendants("sco") {
            let mut info = ScoInfo::from_element(sco)?;
            info.folder_id.get_or_insert_with(|| folder_id.to_string());
            recordings.push(self.to_recording(info).await);
        }
        Ok(recordings)
    }

    pub(crate) async fn get_active_recording(&self, target: &RecordingTarget) -> CommandResult<Option<Recording>> {
        let room_id = room_target(target)?;
        let Some(recording_id) = self.recorder_activity(room_id).await? else {
            return Ok(None);
        };
        let info = self.sco_info(&recording_id).await?;
        let mut recording = self.to_recording(info).await;
        recording.state = RecordingState::NotProcessed;
        Ok(Some(recording))
    }

    pub(crate) async fn is_recording_active(&self, recording_id: &str) -> CommandResult<bool> {
        let known = self
            .active_recordings
            .get(recording_id)
            .map(|active| active.room_id.clone());
        let room_id = match known {
            Some(room_id) => room_id,
            None => match self.sco_info(recording_id).await?.folder_id {
                Some(parent) => parent,
                None => return Ok(false),
            },
        };
        Ok(self.recorder_activity(&room_id).await?.as_deref() == Some(recording_id))
    }

    /// Whether the recording sits in the recordings folder or one of its sub-folders
    pub(crate) async fn is_recording_stored(&self, recording_id: &str) -> CommandResult<bool> {
        let key = recording_id.to_string();
        if self.stored_recordings.contains(&key) {
            return Ok(true);
        }

        let recordings_folder = self.recordings_folder().await?;
        let Some(parent) = self.sco_info(recording_id).await?.folder_id else {
            return Ok(false);
        };
        let stored = parent == recordings_folder
            || self.sco_info(&parent).await?.folder_id.as_deref() == Some(recordings_folder.as_str());
        if stored {
            self.stored_recordings.insert(key, ());
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::types::Alias;

    #[test]
    fn test_only_rooms_are_recorded() {
        assert_eq!(room_target(&RecordingTarget::Room("12001".into())).unwrap(), "12001");
        assert!(matches!(
            room_target(&RecordingTarget::Alias(Alias::uri("sip:a@b"))),
            Err(CommandError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_recorded_sco() {
        let idle = XmlElement::parse(
            r#"<results><status code="ok"/><meeting-recorder-activity-info><recording-sco-id/></meeting-recorder-activity-info></results>"#,
        )
        .unwrap();
        assert_eq!(recorded_sco(&idle), None);

        let busy = XmlElement::parse(
            r#"<results><status code="ok"/><meeting-recorder-activity-info><recording-sco-id>13001</recording-sco-id></meeting-recorder-activity-info></results>"#,
        )
        .unwrap();
        assert_eq!(recorded_sco(&busy).as_deref(), Some("13001"));
    }
}
