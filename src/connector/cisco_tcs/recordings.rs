//! Device recordings, calls and recording folders in managed storage.

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::recording_id::RecordingId;
use super::transfer::{sidecar_name, TransferJob};
use super::TcsInner;
use crate::connector::command::Command;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::HttpExchange;
use crate::connector::types::{Alias, Recording, RecordingFolder, RecordingState, RecordingTarget};
use crate::connector::xml::XmlElement;
use crate::constants::METADATA_SIDECAR_SUFFIX;
use crate::storage::StorageError;

const MEDIA_EXTENSION: &str = "mp4";

/// Recording as listed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeviceRecording {
    pub native_id: String,
    pub title: String,
    pub begin: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    /// Present once the device finished encoding the downloadable movie
    pub download_url: Option<String>,
    pub view_url: Option<String>,
}

impl DeviceRecording {
    fn from_element(conference: &XmlElement) -> Option<Self> {
        let native_id = conference.child_text("ConferenceID")?.to_string();
        let downloadable = conference.child_text("HasDownloadableMovie") == Some("true");
        Some(Self {
            native_id,
            title: conference.child_text("Title").unwrap_or_default().to_string(),
            begin: conference.child_text("DateTime").and_then(parse_timestamp),
            duration_secs: conference
                .child_text("Duration")
                .and_then(|ms| ms.parse::<u64>().ok())
                .map(|ms| ms / 1000),
            download_url: conference
                .find("DownloadableMovie")
                .and_then(|movie| movie.child_text("URL"))
                .filter(|_| downloadable)
                .map(str::to_string),
            view_url: conference.child_text("URL").map(str::to_string),
        })
    }
}

/// Active call of the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeviceCall {
    pub call_id: String,
    pub conference_id: String,
    pub remote_address: String,
    pub title: String,
}

impl DeviceCall {
    fn from_element(call: &XmlElement) -> Option<Self> {
        Some(Self {
            call_id: call.child_text("CallID")?.to_string(),
            conference_id: call.child_text("ConferenceID")?.to_string(),
            remote_address: call.child_text("RemoteAddress").unwrap_or_default().to_string(),
            title: call.child_text("Title").unwrap_or_default().to_string(),
        })
    }
}

/// RFC 3339 or Unix seconds
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn dialed_alias(target: &RecordingTarget) -> CommandResult<&Alias> {
    match target {
        RecordingTarget::Alias(alias) => Ok(alias),
        RecordingTarget::Room(room_id) => Err(CommandError::invalid_argument(format!(
            "content server hosts no rooms, cannot record room {room_id}"
        ))),
    }
}

fn new_file_id() -> String {
    let suffix: u16 = rand::thread_rng().gen();
    format!(
        "recording_{}_{suffix:04x}.{MEDIA_EXTENSION}",
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

fn ignore_missing(result: Result<(), StorageError>) -> CommandResult<()> {
    match result {
        Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
        Err(error) => Err(error.into()),
    }
}

impl<H: HttpExchange> TcsInner<H> {
    pub(crate) async fn device_recordings(&self) -> CommandResult<Vec<DeviceRecording>> {
        let reply = self.call(Command::new("GetRecordings")).await?;
        Ok(reply
            .document
            .descendants("Conference")
            .into_iter()
            .filter_map(DeviceRecording::from_element)
            .collect())
    }

    /// Device recordings created by this connector, with their decoded ids
    pub(crate) async fn managed_recordings(&self) -> CommandResult<Vec<(RecordingId, DeviceRecording)>> {
        let prefix = &self.settings.recordings_prefix;
        let pattern = &self.settings.recording_name_pattern;
        Ok(self
            .device_recordings()
            .await?
            .into_iter()
            .filter(|recording| pattern.is_match(&recording.title))
            .filter_map(|recording| {
                RecordingId::from_title(prefix, &recording.title, &recording.native_id)
                    .map(|id| (id, recording))
            })
            .collect())
    }

    async fn calls(&self) -> CommandResult<Vec<DeviceCall>> {
        let reply = self.call(Command::new("GetCalls")).await?;
        Ok(reply
            .document
            .descendants("Call")
            .into_iter()
            .filter_map(DeviceCall::from_element)
            .collect())
    }

    /// Raw `GetConference` response
    pub(crate) async fn conference_metadata(&self, native_id: &str) -> CommandResult<String> {
        let reply = self
            .call(Command::new("GetConference").param("ConferenceID", native_id))
            .await?;
        Ok(reply.raw)
    }

    pub(crate) async fn delete_device_recording(&self, native_id: &str) -> CommandResult<()> {
        self.call(Command::new("DeleteRecording").param("ConferenceID", native_id))
            .await?;
        debug!(device_id = %self.device_id, native_id = %native_id, "Device recording deleted");
        Ok(())
    }

    pub(crate) async fn create_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<String> {
        let folder_id = self.storage.create_folder(&folder.name).await?;
        self.storage
            .set_folder_permissions(&folder_id, &folder.user_permissions)
            .await?;
        Ok(folder_id)
    }

    pub(crate) async fn modify_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<()> {
        let folder_id = folder
            .id
            .as_deref()
            .ok_or_else(|| CommandError::invalid_argument("recording folder to modify has no id"))?;
        self.storage
            .set_folder_permissions(folder_id, &folder.user_permissions)
            .await?;
        Ok(())
    }

    /// Wait for transfers into the folder, drop leftover device originals, then the folder
    pub(crate) async fn delete_recording_folder(&self, folder_id: &str) -> CommandResult<()> {
        let _closed = self.transfers.close_folder(folder_id);
        let timeout = self.settings.folder_delete_timeout;
        if !self.transfers.wait_for_folder(folder_id, timeout).await {
            warn!(
                device_id = %self.device_id,
                folder_id = %folder_id,
                timeout_ms = timeout.as_millis() as u64,
                "⏳ Transfers into folder still running, deleting anyway"
            );
        }

        for (id, _) in self.managed_recordings().await? {
            if id.folder_id != folder_id {
                continue;
            }
            if let Err(error) = self.delete_device_recording(&id.native_id).await {
                warn!(device_id = %self.device_id, recording = %id, error = %error, "⚠️ Leftover recording not deleted");
            }
        }

        self.storage.delete_folder(folder_id).await?;
        info!(device_id = %self.device_id, folder_id = %folder_id, "🗑️ Recording folder deleted");
        Ok(())
    }

    pub(crate) async fn start_recording(&self, folder_id: &str, target: &RecordingTarget) -> CommandResult<String> {
        let alias = dialed_alias(target)?;
        let recorder = self.settings.recording_alias.as_deref().ok_or_else(|| {
            CommandError::invalid_argument(format!("no recording alias configured for {}", self.device_id))
        })?;
        if !self.storage.folder_exists(folder_id).await? {
            return Err(StorageError::not_found(folder_id).into());
        }

        let file_id = new_file_id();
        // Rejects folder ids the title encoding could not carry
        RecordingId::new(folder_id, file_id.as_str(), "")?;
        let title = RecordingId::title(&self.settings.recordings_prefix, folder_id, &file_id);
        let reply = self
            .call(
                Command::new("Dial")
                    .param("Number", alias.value.clone())
                    .param("Bitrate", self.settings.bitrate.clone())
                    .param("Alias", recorder)
                    .param("Title", title.clone())
                    .param("SetMetadata", "true"),
            )
            .await?;
        let conference_id = reply
            .document
            .find("ConferenceID")
            .map(|id| id.text.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CommandError::parse("Dial response without ConferenceID"))?;

        let id = RecordingId::new(folder_id, file_id, conference_id)?;
        info!(device_id = %self.device_id, recording = %id, alias = %alias, "🔴 Recording call dialed");
        Ok(id.to_string())
    }

    /// Hang up and store the metadata; the media follows through reconciliation
    pub(crate) async fn stop_recording(&self, recording_id: &str) -> CommandResult<()> {
        let id: RecordingId = recording_id.parse()?;
        let call = self
            .calls()
            .await?
            .into_iter()
            .find(|call| call.conference_id == id.native_id);
        match call {
            Some(call) => {
                self.call(Command::new("DisconnectCall").param("CallID", call.call_id))
                    .await?;
            }
            None => debug!(device_id = %self.device_id, recording = %id, "Recording call already ended"),
        }
        self.write_metadata(&id).await?;
        info!(device_id = %self.device_id, recording = %id, "⏹️ Recording stopped");
        Ok(())
    }

    pub(crate) async fn delete_recording(&self, recording_id: &str) -> CommandResult<()> {
        let id: RecordingId = recording_id.parse()?;
        if !id.native_id.is_empty() {
            match self.delete_device_recording(&id.native_id).await {
                Ok(()) => {}
                // Already relocated
                Err(error) if error.code().is_some() => {
                    debug!(device_id = %self.device_id, recording = %id, error = %error, "Device copy absent");
                }
                Err(error) => return Err(error),
            }
        }
        ignore_missing(self.storage.delete_file(&id.folder_id, &id.file_id).await)?;
        ignore_missing(
            self.storage
                .delete_file(&id.folder_id, &sidecar_name(&id.file_id))
                .await,
        )?;
        Ok(())
    }

    pub(crate) async fn list_recordings(&self, folder_id: &str) -> CommandResult<Vec<Recording>> {
        let mut recordings = Vec::new();
        let mut on_device = HashSet::new();
        for (id, device) in self.managed_recordings().await? {
            if id.folder_id != folder_id {
                continue;
            }
            on_device.insert(id.file_id.clone());
            recordings.push(Recording {
                id: id.to_string(),
                recording_folder_id: Some(id.folder_id.clone()),
                name: device.title.clone(),
                file_name: Some(id.file_id.clone()),
                begin_date: device.begin,
                duration_secs: device.duration_secs,
                state: if device.download_url.is_some() {
                    RecordingState::Available
                } else {
                    RecordingState::Processing
                },
                download_url: device.download_url,
                view_url: device.view_url,
            });
        }

        for file in self.storage.list_files(folder_id, None).await? {
            if file.ends_with(METADATA_SIDECAR_SUFFIX) || on_device.contains(&file) {
                continue;
            }
            let Ok(id) = RecordingId::new(folder_id, file.clone(), "") else {
                warn!(device_id = %self.device_id, folder_id = %folder_id, file = %file, "⚠️ Stored file cannot be addressed, skipping");
                continue;
            };
            recordings.push(Recording {
                id: id.to_string(),
                recording_folder_id: Some(folder_id.to_string()),
                name: file.clone(),
                download_url: self.storage.get_file_downloadable_url(folder_id, &file).await?,
                file_name: Some(file),
                begin_date: None,
                duration_secs: None,
                view_url: None,
                state: RecordingState::Available,
            });
        }
        Ok(recordings)
    }

    pub(crate) async fn get_active_recording(&self, target: &RecordingTarget) -> CommandResult<Option<Recording>> {
        let alias = dialed_alias(target)?;
        let Some(call) = self
            .calls()
            .await?
            .into_iter()
            .find(|call| call.remote_address == alias.value)
        else {
            return Ok(None);
        };
        let id = RecordingId::from_title(&self.settings.recordings_prefix, &call.title, &call.conference_id);
        Ok(Some(Recording {
            id: id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| call.conference_id.clone()),
            recording_folder_id: id.as_ref().map(|id| id.folder_id.clone()),
            name: call.title,
            file_name: id.map(|id| id.file_id),
            begin_date: None,
            duration_secs: None,
            download_url: None,
            view_url: None,
            state: RecordingState::NotProcessed,
        }))
    }

    pub(crate) async fn is_recording_active(&self, recording_id: &str) -> CommandResult<bool> {
        let id: RecordingId = recording_id.parse()?;
        if id.native_id.is_empty() {
            return Ok(false);
        }
        Ok(self
            .calls()
            .await?
            .iter()
            .any(|call| call.conference_id == id.native_id))
    }

    /// Queue every finished recording whose folder still exists
    pub(crate) async fn check_recordings(&self) {
        if !self.state.get().is_connected() {
            return;
        }
        let recordings = match self.managed_recordings().await {
            Ok(recordings) => recordings,
            Err(error) => {
                warn!(device_id = %self.device_id, error = %error, "⚠️ Recordings check failed");
                return;
            }
        };

        let mut folders: HashMap<String, bool> = HashMap::new();
        let mut queued = 0usize;
        for (id, device) in recordings {
            let Some(download_url) = device.download_url else {
                continue;
            };
            if self.transfers.is_queued(&id.key()) || self.transfers.is_folder_closed(&id.folder_id) {
                continue;
            }
            let exists = match folders.get(&id.folder_id) {
                Some(exists) => *exists,
                None => {
                    let exists = match self.storage.folder_exists(&id.folder_id).await {
                        Ok(exists) => exists,
                        Err(error) => {
                            warn!(device_id = %self.device_id, folder_id = %id.folder_id, error = %error, "⚠️ Folder lookup failed");
                            false
                        }
                    };
                    folders.insert(id.folder_id.clone(), exists);
                    exists
                }
            };
            if !exists {
                debug!(device_id = %self.device_id, recording = %id, "Folder not managed, skipping");
                continue;
            }
            if self.transfers.enqueue(TransferJob {
                recording: id,
                download_url,
            }) {
                queued += 1;
            }
        }
        if queued > 0 {
            info!(device_id = %self.device_id, queued, "📥 Recordings queued for transfer");
        }
    }
}
