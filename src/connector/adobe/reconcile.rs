//! Periodic passes run by the background loops.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::AdobeInner;
use crate::connector::command::Command;
use crate::connector::controller::Notification;
use crate::connector::error::CommandResult;
use crate::connector::http::HttpExchange;

/// Managed room that is currently running
struct ActiveRoom {
    room_id: String,
    name: String,
    participants: Option<usize>,
}

impl<H: HttpExchange> AdobeInner<H> {
    async fn managed_room_ids(&self) -> CommandResult<HashSet<String>> {
        let folder_id = self.meetings_folder().await?;
        Ok(self
            .contents(&folder_id, Some("meeting"))
            .await?
            .into_iter()
            .map(|info| info.sco_id)
            .collect())
    }

    async fn active_rooms(&self, managed: &HashSet<String>) -> CommandResult<Vec<ActiveRoom>> {
        let response = match self.request(Command::new("report-active-meetings")).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => return Ok(Vec::new()),
            Err(error) => return Err(error),
        };
        Ok(response
            .descendants("sco")
            .into_iter()
            .filter_map(|sco| {
                let room_id = sco.attr("sco-id")?;
                managed.contains(room_id).then(|| ActiveRoom {
                    room_id: room_id.to_string(),
                    name: sco.child_text("name").unwrap_or(room_id).to_string(),
                    participants: sco
                        .attr("active-participants")
                        .and_then(|count| count.parse().ok()),
                })
            })
            .collect())
    }

    /// Notify room owners about rooms holding more participants than licensed
    pub(crate) async fn check_capacity(&self) {
        if !self.state.get().is_connected() {
            return;
        }
        let managed = match self.managed_room_ids().await {
            Ok(managed) => managed,
            Err(error) => {
                warn!(device_id = %self.device_id, error = %error, "⚠️ Capacity check failed");
                return;
            }
        };
        // Rooms deleted out of band
        self.capacities.retain(|room_id, _| managed.contains(room_id));

        let rooms = match self.active_rooms(&managed).await {
            Ok(rooms) => rooms,
            Err(error) => {
                warn!(device_id = %self.device_id, error = %error, "⚠️ Capacity check failed");
                return;
            }
        };

        let active: HashSet<&str> = rooms.iter().map(|room| room.room_id.as_str()).collect();
        self.capacity_notified
            .retain(|room_id, _| active.contains(room_id.as_str()));

        for room in &rooms {
            if let Err(error) = self.check_room_capacity(room).await {
                warn!(
                    device_id = %self.device_id,
                    room_id = %room.room_id,
                    error = %error,
                    "⚠️ Capacity check of room failed"
                );
            }
        }
    }

    async fn check_room_capacity(&self, room: &ActiveRoom) -> CommandResult<()> {
        let Some(capacity) = self.room_capacity(&room.room_id).await else {
            debug!(device_id = %self.device_id, room_id = %room.room_id, "Room capacity unknown");
            return Ok(());
        };
        let participants = match room.participants {
            Some(count) => count,
            None => self.list_room_participants(&room.room_id).await?.len(),
        };

        if participants <= capacity as usize {
            self.capacity_notified.remove(&room.room_id);
            return Ok(());
        }
        let already = self
            .capacity_notified
            .get(&room.room_id)
            .map(|count| *count);
        if already.is_some_and(|count| count >= participants) {
            return Ok(());
        }

        warn!(
            device_id = %self.device_id,
            room_id = %room.room_id,
            participants,
            capacity,
            "🚨 Room capacity exceeded"
        );
        let notification = Notification::room_capacity_exceeded(&room.name, participants, capacity);
        if self
            .controller
            .notify_room_owners(&room.room_id, notification)
            .await
        {
            self.capacity_notified
                .insert(room.room_id.clone(), participants);
        }
        Ok(())
    }

    /// Move finished recordings still sitting in a managed room into their folders
    pub(crate) async fn check_recordings(&self) {
        if !self.state.get().is_connected() {
            return;
        }
        if let Err(error) = self.reconcile_recordings().await {
            warn!(device_id = %self.device_id, error = %error, "⚠️ Recordings check failed");
        }
    }

    async fn reconcile_recordings(&self) -> CommandResult<()> {
        let command = Command::new("report-bulk-objects").param("filter-type", "archive");
        let response = match self.request(command).await {
            Ok(response) => response,
            Err(error) if error.has_code("no-data", None) => {
                self.stored_recordings.clear();
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        let pattern = &self.settings.recording_name_pattern;
        let recordings: Vec<String> = response
            .descendants("row")
            .into_iter()
            .filter(|row| row.child_text("name").is_some_and(|name| pattern.is_match(name)))
            .filter_map(|row| row.attr("sco-id").map(str::to_string))
            .collect();
        let listed: HashSet<&str> = recordings.iter().map(String::as_str).collect();
        self.stored_recordings.retain(|id| listed.contains(id.as_str()));

        let rooms = self.managed_room_ids().await?;
        let mut moved = 0usize;
        for recording_id in &recordings {
            if self.stored_recordings.contains(recording_id)
                || self.active_recordings.contains_key(recording_id)
            {
                continue;
            }
            let parent = match self.sco_info(recording_id).await {
                Ok(info) => info.folder_id,
                Err(error) => {
                    warn!(device_id = %self.device_id, recording_id = %recording_id, error = %error, "⚠️ Recording lookup failed");
                    continue;
                }
            };
            let Some(room_id) = parent.filter(|parent| rooms.contains(parent)) else {
                // Somewhere else; remember it when it is already stored
                if let Err(error) = self.is_recording_stored(recording_id).await {
                    debug!(device_id = %self.device_id, recording_id = %recording_id, error = %error, "Stored check failed");
                }
                continue;
            };
            let Some(folder_id) = self.controller.get_recording_folder(&room_id).await else {
                debug!(device_id = %self.device_id, room_id = %room_id, "No recording folder assigned to room");
                continue;
            };
            if self.relocate(recording_id, &folder_id).await {
                moved += 1;
            }
        }

        if moved > 0 {
            info!(device_id = %self.device_id, moved, "📦 Recordings reconciled");
        }
        Ok(())
    }
}
