//! # Executor
//!
//! Time-driven reconciliation driver. For a reference instant it decides which
//! executables must stop, be updated or migrated, and start, then issues the matching
//! connector commands in dependency order.
//!
//! ## Pass structure
//!
//! 1. **Selection** of the to-stop, changed and to-start sets from the store
//! 2. **Planning**: both plans are built before any command is sent, so a dependency
//!    cycle rejects the whole pass
//! 3. **Stop** through a [`ReverseExecutionPlan`] (dependents before what they use)
//! 4. **Update / migrate** changed executables in declaration order
//! 5. **Start** through an [`ExecutionPlan`] (children before dependents)
//!
//! Command failures are isolated to their executable: it is marked failed with a state
//! report entry and the pass continues. The executor never retries a command itself.
//! An executable found `Migrating` at the start of a pass belongs to a pass that aborted
//! mid-migration; it is marked failed so later passes reconcile it normally.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::executable::{
    Executable, ExecutableId, ExecutableKind, ExecutableState, ExecutionPhase, ReportEntry,
};
use super::plan::{ExecutionPlan, ReverseExecutionPlan};
use super::store::ExecutableStore;
use crate::config::ExecutorSettings;
use crate::connector::{
    Alias, CommandError, CommandResult, ConnectorHandle, ConnectorOperation, ConnectorRegistry,
    RecordingFolder, RecordingTarget,
};
use crate::error::{BrokerError, Result};
use crate::execution::DeviceId;
use crate::logging::log_executable_operation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// How long before its slot begins an executable is started
    pub start_margin: Duration,
    /// How long after its slot ends an executable is stopped
    pub stop_margin: Duration,
}

impl From<&ExecutorSettings> for ExecutorConfig {
    fn from(settings: &ExecutorSettings) -> Self {
        Self {
            start_margin: settings.start_margin,
            stop_margin: settings.stop_margin,
        }
    }
}

/// Outcome of one pass; ids in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub started: Vec<ExecutableId>,
    pub stopped: Vec<ExecutableId>,
    pub updated: Vec<ExecutableId>,
    pub migrated: Vec<ExecutableId>,
    /// Executables whose start, stop, update or migration failed
    pub failed: Vec<ExecutableId>,
}

impl ExecutionResult {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty()
            && self.stopped.is_empty()
            && self.updated.is_empty()
            && self.migrated.is_empty()
            && self.failed.is_empty()
    }
}

pub struct Executor {
    store: Arc<dyn ExecutableStore>,
    connectors: Arc<ConnectorRegistry>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("connectors", &self.connectors)
            .field("config", &self.config)
            .finish()
    }
}

impl Executor {
    pub fn new(
        store: Arc<dyn ExecutableStore>,
        connectors: Arc<ConnectorRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            connectors,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn connectors(&self) -> &Arc<ConnectorRegistry> {
        &self.connectors
    }

    /// Run one reconciliation pass for `reference_time`
    #[instrument(skip(self), fields(reference_time = %reference_time))]
    pub async fn execute(&self, reference_time: DateTime<Utc>) -> Result<ExecutionResult> {
        let mut executables: BTreeMap<ExecutableId, Executable> = self
            .store
            .list()
            .into_iter()
            .map(|executable| (executable.id, executable))
            .collect();
        let interrupted = self.recover_interrupted(&mut executables, reference_time)?;

        let selection = Selection::compute(&executables, reference_time, &self.config);
        if selection.is_empty() {
            debug!("Nothing to execute");
            return Ok(ExecutionResult {
                failed: interrupted,
                ..ExecutionResult::default()
            });
        }

        let forward = ExecutionPlan::from_dependencies(
            selection
                .to_start
                .iter()
                .filter_map(|id| executables.get(id))
                .map(|executable| (executable.id, executable.dependencies())),
        )
        .map_err(|error| {
            error!(error = %error, "❌ Start plan rejected");
            BrokerError::from(error)
        })?;
        let reverse = ReverseExecutionPlan::from_dependencies(
            selection
                .to_stop
                .iter()
                .filter_map(|id| executables.get(id))
                .map(|executable| (executable.id, executable.dependencies())),
        )
        .map_err(|error| {
            error!(error = %error, "❌ Stop plan rejected");
            BrokerError::from(error)
        })?;

        info!(
            to_start = selection.to_start.len(),
            to_stop = selection.to_stop.len(),
            changed = selection.changed.len(),
            "🚀 Executing reconciliation pass"
        );

        let mut pass = Pass {
            executor: self,
            executables,
            reference_time,
            result: ExecutionResult {
                failed: interrupted,
                ..ExecutionResult::default()
            },
        };
        pass.stop_all(reverse).await?;
        for id in &selection.changed {
            pass.update(*id).await?;
        }
        pass.start_all(forward).await?;

        let result = pass.result;
        info!(
            started = result.started.len(),
            stopped = result.stopped.len(),
            updated = result.updated.len(),
            migrated = result.migrated.len(),
            failed = result.failed.len(),
            "✅ Reconciliation pass completed"
        );
        Ok(result)
    }

    /// Fail executables left `Migrating` by an aborted pass
    fn recover_interrupted(
        &self,
        executables: &mut BTreeMap<ExecutableId, Executable>,
        reference_time: DateTime<Utc>,
    ) -> Result<Vec<ExecutableId>> {
        let mut recovered = Vec::new();
        for executable in executables.values_mut() {
            if executable.state != ExecutableState::Migrating {
                continue;
            }
            warn!(executable_id = %executable.id, "⚠️ Migration interrupted by an earlier pass");
            let mut failed = executable.clone();
            mark_interrupted(&mut failed, reference_time);
            self.store.update(&failed)?;
            *executable = failed;
            recovered.push(executable.id);
        }
        Ok(recovered)
    }

    fn handle(&self, device: &DeviceId) -> CommandResult<ConnectorHandle> {
        self.connectors
            .get(device)
            .ok_or_else(|| CommandError::not_connected(device.as_str()))
    }
}

fn mark_interrupted(executable: &mut Executable, reference_time: DateTime<Utc>) {
    executable.state = ExecutableState::Failed;
    executable.report.push(ReportEntry::interrupted(
        reference_time,
        ExecutionPhase::Migrate,
        format!("migration of revision {} did not complete", executable.revision),
    ));
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero())
}

/// Executable sets for one pass
#[derive(Debug, Default)]
struct Selection {
    to_start: BTreeSet<ExecutableId>,
    to_stop: BTreeSet<ExecutableId>,
    changed: Vec<ExecutableId>,
}

impl Selection {
    fn compute(
        executables: &BTreeMap<ExecutableId, Executable>,
        reference_time: DateTime<Utc>,
        config: &ExecutorConfig,
    ) -> Self {
        let start_margin = to_chrono(config.start_margin);
        let stop_margin = to_chrono(config.stop_margin);

        // Due to start and not already past their stop point, plus NOT_STARTED children
        let mut to_start = BTreeSet::new();
        let mut pending: Vec<ExecutableId> = executables
            .values()
            .filter(|e| e.state == ExecutableState::NotStarted)
            .filter(|e| e.slot.start - start_margin <= reference_time)
            .filter(|e| reference_time < e.slot.end + stop_margin)
            .map(|e| e.id)
            .collect();
        while let Some(id) = pending.pop() {
            if !to_start.insert(id) {
                continue;
            }
            if let Some(executable) = executables.get(&id) {
                for child in executable.dependencies() {
                    let not_started = executables
                        .get(&child)
                        .is_some_and(|c| c.state == ExecutableState::NotStarted);
                    if not_started && !to_start.contains(&child) {
                        pending.push(child);
                    }
                }
            }
        }

        let mut to_stop: BTreeSet<ExecutableId> = executables
            .values()
            .filter(|e| e.state.is_active())
            .filter(|e| e.slot.end + stop_margin <= reference_time)
            .map(|e| e.id)
            .collect();

        // Keep anything a surviving or starting dependent still uses
        loop {
            let deferred: Vec<ExecutableId> = to_stop
                .iter()
                .copied()
                .filter(|id| {
                    executables.values().any(|dependent| {
                        let surviving = (dependent.state.is_active() && !to_stop.contains(&dependent.id))
                            || to_start.contains(&dependent.id);
                        surviving && dependent.dependencies().contains(id)
                    })
                })
                .collect();
            if deferred.is_empty() {
                break;
            }
            for id in deferred {
                debug!(executable_id = %id, "⏸️ Stop deferred, still used by a running dependent");
                to_stop.remove(&id);
            }
        }

        let changed = executables
            .values()
            .filter(|e| e.needs_update() && !to_stop.contains(&e.id))
            .map(|e| e.id)
            .collect();

        Self {
            to_start,
            to_stop,
            changed,
        }
    }

    fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_stop.is_empty() && self.changed.is_empty()
    }
}

/// Where a started room lives
#[derive(Debug, Clone)]
struct RoomLocation {
    device: DeviceId,
    room_id: String,
    alias: Option<Alias>,
}

/// Mutable state of one pass
struct Pass<'a> {
    executor: &'a Executor,
    executables: BTreeMap<ExecutableId, Executable>,
    reference_time: DateTime<Utc>,
    result: ExecutionResult,
}

impl Pass<'_> {
    fn executable(&self, id: ExecutableId) -> Result<Executable> {
        self.executables
            .get(&id)
            .cloned()
            .ok_or(BrokerError::UnknownExecutable(id))
    }

    /// Persist a transition and keep the working copy in sync
    fn commit(&mut self, executable: Executable) -> Result<()> {
        self.executor.store.update(&executable)?;
        self.executables.insert(executable.id, executable);
        Ok(())
    }

    fn room_location(&self, room: ExecutableId) -> Option<RoomLocation> {
        let executable = self.executables.get(&room)?;
        if !executable.state.is_active() {
            return None;
        }
        match (&executable.kind, &executable.resource_id) {
            (ExecutableKind::Room(endpoint), Some(room_id)) => Some(RoomLocation {
                device: endpoint.device.clone(),
                room_id: room_id.clone(),
                alias: endpoint.room.aliases.first().cloned(),
            }),
            _ => None,
        }
    }

    fn fail(
        &mut self,
        mut executable: Executable,
        phase: ExecutionPhase,
        error: &CommandError,
    ) -> Result<()> {
        warn!(
            executable_id = %executable.id,
            phase = %phase,
            error = %error,
            "❌ Executable command failed"
        );
        log_executable_operation(
            &phase.to_string(),
            &executable.id.to_string(),
            executable.kind.name(),
            "failed",
            Some(&error.to_string()),
        );
        executable.state = ExecutableState::Failed;
        executable
            .report
            .push(ReportEntry::from_command_error(self.reference_time, phase, error));
        self.result.failed.push(executable.id);
        self.commit(executable)
    }

    // ---- stop ----

    async fn stop_all(&mut self, mut plan: ReverseExecutionPlan) -> Result<()> {
        loop {
            let batch = plan.pop_executables();
            if batch.is_empty() {
                return Ok(());
            }
            for id in batch {
                self.stop(id).await?;
                plan.remove_executable(id);
            }
        }
    }

    async fn stop(&mut self, id: ExecutableId) -> Result<()> {
        let mut executable = self.executable(id)?;
        if executable.state != ExecutableState::Stopping {
            executable.state = ExecutableState::Stopping;
            self.commit(executable.clone())?;
        }

        match self.stop_command(&executable).await {
            Ok(()) => {
                executable.state = ExecutableState::Stopped;
                log_executable_operation("stop", &id.to_string(), executable.kind.name(), "stopped", None);
                self.result.stopped.push(id);
                self.commit(executable)
            }
            Err(error) => self.fail(executable, ExecutionPhase::Stop, &error),
        }
    }

    async fn stop_command(&self, executable: &Executable) -> CommandResult<()> {
        match &executable.kind {
            ExecutableKind::Room(endpoint) => {
                let Some(room_id) = &executable.resource_id else {
                    return Ok(());
                };
                self.executor.handle(&endpoint.device)?.delete_room(room_id).await
            }
            ExecutableKind::Connection(connection) => {
                let (Some(participant), Some(location)) =
                    (&executable.resource_id, self.room_location(connection.room))
                else {
                    // The participant left together with its room
                    return Ok(());
                };
                let handle = self.executor.handle(&location.device)?;
                if !handle.supports(ConnectorOperation::DisconnectParticipant) {
                    return Ok(());
                }
                handle
                    .disconnect_participant(&location.room_id, participant)
                    .await
            }
            ExecutableKind::Compartment => Ok(()),
            ExecutableKind::Recording(service) => {
                let Some(recording_id) = &executable.resource_id else {
                    return Ok(());
                };
                self.executor
                    .handle(&service.device)?
                    .stop_recording(recording_id)
                    .await
            }
        }
    }

    // ---- start ----

    async fn start_all(&mut self, mut plan: ExecutionPlan) -> Result<()> {
        loop {
            let batch = plan.pop_executables();
            if batch.is_empty() {
                return Ok(());
            }
            for id in batch {
                self.start(id).await?;
                plan.remove_executable(id);
            }
        }
    }

    async fn start(&mut self, id: ExecutableId) -> Result<()> {
        let mut executable = self.executable(id)?;

        let unavailable: Vec<ExecutableId> = executable
            .dependencies()
            .into_iter()
            .filter(|child| {
                self.executables
                    .get(child)
                    .map_or(true, |c| c.state != ExecutableState::Started)
            })
            .collect();
        if !unavailable.is_empty() {
            let message = format!(
                "dependencies not started: {}",
                unavailable
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            warn!(executable_id = %id, reason = %message, "❌ Executable cannot start");
            log_executable_operation("start", &id.to_string(), executable.kind.name(), "failed", Some(&message));
            executable.state = ExecutableState::Failed;
            executable.report.push(ReportEntry::dependency(
                self.reference_time,
                ExecutionPhase::Start,
                message,
            ));
            self.result.failed.push(id);
            return self.commit(executable);
        }

        match self.start_command(&mut executable).await {
            Ok(()) => {
                executable.state = ExecutableState::Started;
                executable.mark_applied();
                log_executable_operation(
                    "start",
                    &id.to_string(),
                    executable.kind.name(),
                    "started",
                    executable.resource_id.as_deref(),
                );
                self.result.started.push(id);
                self.commit(executable)
            }
            Err(error) => self.fail(executable, ExecutionPhase::Start, &error),
        }
    }

    async fn start_command(&self, executable: &mut Executable) -> CommandResult<()> {
        match executable.kind.clone() {
            ExecutableKind::Room(endpoint) => {
                let handle = self.executor.handle(&endpoint.device)?;
                let room_id = handle.create_room(&endpoint.room.to_room(None)).await?;
                executable.resource_id = Some(room_id);
                Ok(())
            }
            ExecutableKind::Connection(connection) => {
                let location = self.started_room(connection.room)?;
                let handle = self.executor.handle(&location.device)?;
                let participants = handle
                    .add_room_participants(&location.room_id, std::slice::from_ref(&connection.alias))
                    .await?;
                executable.resource_id = participants.into_iter().next();
                Ok(())
            }
            ExecutableKind::Compartment => Ok(()),
            ExecutableKind::Recording(service) => {
                let location = self.started_room(service.room)?;
                let handle = self.executor.handle(&service.device)?;
                let folder_id = match &executable.recording_folder_id {
                    Some(folder_id) => folder_id.clone(),
                    None => {
                        let folder_id = handle
                            .create_recording_folder(&RecordingFolder::new(service.folder_name.clone()))
                            .await?;
                        executable.recording_folder_id = Some(folder_id.clone());
                        folder_id
                    }
                };
                let target = recording_target(&location, &service.device)?;
                let recording_id = handle.start_recording(&folder_id, &target).await?;
                executable.resource_id = Some(recording_id);
                Ok(())
            }
        }
    }

    fn started_room(&self, room: ExecutableId) -> CommandResult<RoomLocation> {
        self.room_location(room).ok_or_else(|| {
            CommandError::invalid_argument(format!("room {room} is not provisioned"))
        })
    }

    // ---- update / migrate ----

    async fn update(&mut self, id: ExecutableId) -> Result<()> {
        let outcome = self.apply_update(id).await;
        if let Err(error) = &outcome {
            self.abandon_migration(id, error);
        }
        outcome
    }

    /// Best effort after a store failure mid-migration; the next pass recovers otherwise
    fn abandon_migration(&mut self, id: ExecutableId, cause: &BrokerError) {
        let Some(mut executable) = self.executables.get(&id).cloned() else {
            return;
        };
        if executable.state != ExecutableState::Migrating {
            return;
        }
        mark_interrupted(&mut executable, self.reference_time);
        match self.executor.store.update(&executable) {
            Ok(()) => {
                log_executable_operation("migrate", &id.to_string(), executable.kind.name(), "failed", Some(&cause.to_string()));
                self.result.failed.push(id);
                self.executables.insert(id, executable);
            }
            Err(error) => {
                error!(executable_id = %id, error = %error, "❌ Interrupted migration could not be recorded");
            }
        }
    }

    async fn apply_update(&mut self, id: ExecutableId) -> Result<()> {
        let executable = self.executable(id)?;
        if !executable.needs_update() {
            return Ok(());
        }

        match executable.kind.clone() {
            ExecutableKind::Room(endpoint) => {
                let previous_device = match &executable.applied_kind {
                    Some(ExecutableKind::Room(applied)) => applied.device.clone(),
                    _ => endpoint.device.clone(),
                };
                let handle = match self.executor.handle(&endpoint.device) {
                    Ok(handle) => handle,
                    Err(error) => return self.reject(executable, ExecutionPhase::Update, &error),
                };
                if previous_device == endpoint.device && handle.supports(ConnectorOperation::ModifyRoom) {
                    self.modify_room(executable, &handle).await
                } else {
                    self.migrate_room(executable, previous_device, handle).await
                }
            }
            ExecutableKind::Compartment => {
                let mut executable = executable;
                executable.mark_applied();
                self.result.updated.push(id);
                log_executable_operation("update", &id.to_string(), "compartment", "updated", None);
                self.commit(executable)
            }
            ExecutableKind::Connection(_) | ExecutableKind::Recording(_) => {
                self.migrate_dependent(executable).await
            }
        }
    }

    /// Keep the executable running on its applied revision and record why the update failed
    fn reject(&mut self, mut executable: Executable, phase: ExecutionPhase, error: &CommandError) -> Result<()> {
        warn!(
            executable_id = %executable.id,
            revision = executable.revision,
            phase = %phase,
            error = %error,
            "⚠️ Update rejected, keeping the running revision"
        );
        log_executable_operation(
            &phase.to_string(),
            &executable.id.to_string(),
            executable.kind.name(),
            "rejected",
            Some(&error.to_string()),
        );
        executable.state = ExecutableState::Started;
        executable.failed_revision = Some(executable.revision);
        executable
            .report
            .push(ReportEntry::from_command_error(self.reference_time, phase, error));
        self.result.failed.push(executable.id);
        self.commit(executable)
    }

    async fn modify_room(&mut self, mut executable: Executable, handle: &ConnectorHandle) -> Result<()> {
        let ExecutableKind::Room(endpoint) = &executable.kind else {
            return Ok(());
        };
        let room = endpoint.room.to_room(executable.resource_id.clone());
        match handle.modify_room(&room).await {
            Ok(room_id) => {
                executable.resource_id = Some(room_id);
                executable.mark_applied();
                log_executable_operation("update", &executable.id.to_string(), "room", "updated", None);
                self.result.updated.push(executable.id);
                self.commit(executable)
            }
            Err(error) => self.reject(executable, ExecutionPhase::Update, &error),
        }
    }

    /// Create the replacement, repoint running dependents, then delete the original
    async fn migrate_room(
        &mut self,
        mut executable: Executable,
        previous_device: DeviceId,
        target: ConnectorHandle,
    ) -> Result<()> {
        let ExecutableKind::Room(endpoint) = executable.kind.clone() else {
            return Ok(());
        };
        let id = executable.id;
        info!(
            executable_id = %id,
            from = %previous_device,
            to = %endpoint.device,
            "🔀 Migrating room"
        );

        executable.state = ExecutableState::Migrating;
        self.commit(executable.clone())?;

        let replacement = match target.create_room(&endpoint.room.to_room(None)).await {
            Ok(room_id) => room_id,
            Err(error) => return self.reject(executable, ExecutionPhase::Migrate, &error),
        };
        let location = RoomLocation {
            device: endpoint.device.clone(),
            room_id: replacement.clone(),
            alias: endpoint.room.aliases.first().cloned(),
        };

        let dependents: Vec<ExecutableId> = self
            .executables
            .values()
            .filter(|d| d.state == ExecutableState::Started && d.referenced_room() == Some(id))
            .map(|d| d.id)
            .collect();
        for dependent in dependents {
            self.repoint(dependent, &location).await?;
        }

        if let Some(original) = executable.resource_id.clone() {
            let deleted = match self.executor.handle(&previous_device) {
                Ok(handle) => handle.delete_room(&original).await,
                Err(error) => Err(error),
            };
            if let Err(error) = deleted {
                warn!(executable_id = %id, room_id = %original, error = %error, "⚠️ Original room left behind after migration");
                executable
                    .report
                    .push(ReportEntry::from_command_error(self.reference_time, ExecutionPhase::Migrate, &error));
            }
        }

        executable.resource_id = Some(replacement);
        executable.state = ExecutableState::Started;
        executable.mark_applied();
        log_executable_operation("migrate", &id.to_string(), "room", "migrated", executable.resource_id.as_deref());
        self.result.migrated.push(id);
        self.commit(executable)
    }

    /// Point a running connection or recording at a migrated room without restarting it
    async fn repoint(&mut self, id: ExecutableId, location: &RoomLocation) -> Result<()> {
        let mut dependent = self.executable(id)?;
        let outcome = match dependent.kind.clone() {
            ExecutableKind::Connection(connection) => {
                match self.executor.handle(&location.device) {
                    Ok(handle) => handle
                        .add_room_participants(&location.room_id, std::slice::from_ref(&connection.alias))
                        .await
                        .map(|participants| participants.into_iter().next()),
                    Err(error) => Err(error),
                }
            }
            ExecutableKind::Recording(service) => {
                self.restart_recording(&dependent, &service.device, location)
                    .await
                    .map(Some)
            }
            ExecutableKind::Room(_) | ExecutableKind::Compartment => return Ok(()),
        };

        match outcome {
            Ok(resource_id) => {
                debug!(executable_id = %id, "Dependent repointed to migrated room");
                dependent.resource_id = resource_id;
            }
            Err(error) => {
                warn!(executable_id = %id, error = %error, "⚠️ Dependent could not be repointed");
                dependent
                    .report
                    .push(ReportEntry::from_command_error(self.reference_time, ExecutionPhase::Migrate, &error));
            }
        }
        self.commit(dependent)
    }

    async fn restart_recording(
        &self,
        recording: &Executable,
        device: &DeviceId,
        location: &RoomLocation,
    ) -> CommandResult<String> {
        let handle = self.executor.handle(device)?;
        if let Some(previous) = &recording.resource_id {
            if let Err(error) = handle.stop_recording(previous).await {
                warn!(executable_id = %recording.id, error = %error, "⚠️ Previous recording could not be stopped");
            }
        }
        let folder_id = recording
            .recording_folder_id
            .clone()
            .ok_or_else(|| CommandError::invalid_argument("recording folder was never created"))?;
        let target = recording_target(location, device)?;
        handle.start_recording(&folder_id, &target).await
    }

    /// Re-provision a connection or recording whose own specification changed
    async fn migrate_dependent(&mut self, mut executable: Executable) -> Result<()> {
        let id = executable.id;
        let Some(room) = executable.referenced_room() else {
            return Ok(());
        };
        let Some(location) = self.room_location(room) else {
            let error = CommandError::invalid_argument(format!("room {room} is not provisioned"));
            return self.reject(executable, ExecutionPhase::Migrate, &error);
        };

        executable.state = ExecutableState::Migrating;
        self.commit(executable.clone())?;

        let outcome = match executable.kind.clone() {
            ExecutableKind::Connection(connection) => {
                self.replace_participant(&executable, &connection.alias, &location).await
            }
            ExecutableKind::Recording(service) => {
                self.replace_recording(&mut executable, &service.device, &service.folder_name, &location)
                    .await
            }
            ExecutableKind::Room(_) | ExecutableKind::Compartment => return Ok(()),
        };

        match outcome {
            Ok(resource_id) => {
                executable.resource_id = Some(resource_id);
                executable.state = ExecutableState::Started;
                executable.mark_applied();
                log_executable_operation("migrate", &id.to_string(), executable.kind.name(), "migrated", None);
                self.result.migrated.push(id);
                self.commit(executable)
            }
            Err(error) => self.reject(executable, ExecutionPhase::Migrate, &error),
        }
    }

    /// Dial the new alias first, then drop the previous participant
    async fn replace_participant(
        &self,
        executable: &Executable,
        alias: &Alias,
        location: &RoomLocation,
    ) -> CommandResult<String> {
        let handle = self.executor.handle(&location.device)?;
        let participant = handle
            .add_room_participants(&location.room_id, std::slice::from_ref(alias))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CommandError::protocol("device returned no participant id"))?;

        if let Some(previous) = &executable.resource_id {
            if handle.supports(ConnectorOperation::DisconnectParticipant) {
                if let Err(error) = handle.disconnect_participant(&location.room_id, previous).await {
                    warn!(executable_id = %executable.id, error = %error, "⚠️ Previous participant left connected");
                }
            }
        }
        Ok(participant)
    }

    /// Recorders cannot capture twice, so the old recording stops before the new one starts
    async fn replace_recording(
        &self,
        executable: &mut Executable,
        device: &DeviceId,
        folder_name: &str,
        location: &RoomLocation,
    ) -> CommandResult<String> {
        let previous_device = match &executable.applied_kind {
            Some(ExecutableKind::Recording(applied)) => applied.device.clone(),
            _ => device.clone(),
        };
        if let Some(previous) = &executable.resource_id {
            self.executor
                .handle(&previous_device)?
                .stop_recording(previous)
                .await?;
        }

        let handle = self.executor.handle(device)?;
        let reuse_folder = matches!(
            &executable.applied_kind,
            Some(ExecutableKind::Recording(applied)) if applied.device == *device && applied.folder_name == folder_name
        );
        let folder_id = match (&executable.recording_folder_id, reuse_folder) {
            (Some(folder_id), true) => folder_id.clone(),
            _ => {
                let folder_id = handle
                    .create_recording_folder(&RecordingFolder::new(folder_name))
                    .await?;
                executable.recording_folder_id = Some(folder_id.clone());
                folder_id
            }
        };
        let target = recording_target(location, device)?;
        handle.start_recording(&folder_id, &target).await
    }
}

/// A recorder on the room's own device records the room; elsewhere it dials the room alias
fn recording_target(location: &RoomLocation, recording_device: &DeviceId) -> CommandResult<RecordingTarget> {
    if location.device == *recording_device {
        return Ok(RecordingTarget::Room(location.room_id.clone()));
    }
    location
        .alias
        .clone()
        .map(RecordingTarget::Alias)
        .ok_or_else(|| {
            CommandError::invalid_argument(format!(
                "room {} on {} has no alias a recorder could dial",
                location.room_id, location.device
            ))
        })
}
