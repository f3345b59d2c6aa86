//! # Cisco TCS Connector
//!
//! Connector for a content server recording calls it dials. Every SOAP call is sent
//! unauthenticated first; the 401 digest challenge is answered exactly once.
//!
//! Recording folders live in managed storage. A recording is identified by
//! [`RecordingId`] (`folder:file:conference`) and the folder and file are encoded in the
//! device recording title, so the reconciliation loop can find the target of every
//! finished recording. Finished recordings are moved into storage by a fixed-size
//! transfer pool; the device copy is deleted only once the stored copy and its metadata
//! sidecar are written.

mod digest;
mod protocol;
mod recording_id;
mod recordings;
mod transfer;

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use digest::DigestChallenge;
pub use recording_id::RecordingId;

use super::background::BackgroundTasks;
use super::controller::{ControllerChannel, ControllerClient};
use super::error::{CommandError, CommandResult};
use super::http::{HttpExchange, ReqwestExchange};
use super::operation::{CapabilitySet, ConnectorOperation};
use super::types::{Credentials, DeviceAddress, Recording, RecordingFolder, RecordingTarget};
use super::{ConnectionState, ConnectionStateCell, Connector, ConnectorInfo};
use crate::config::{ConfigResult, ConfigurationError, ConnectorKind, ConnectorOptions};
use crate::constants::{defaults, options as keys};
use crate::storage::Storage;

use protocol::Endpoint;
use transfer::TransferPool;

const CAPABILITIES: CapabilitySet = CapabilitySet::of(&[
    ConnectorOperation::CreateRecordingFolder,
    ConnectorOperation::ModifyRecordingFolder,
    ConnectorOperation::DeleteRecordingFolder,
    ConnectorOperation::StartRecording,
    ConnectorOperation::StopRecording,
    ConnectorOperation::DeleteRecording,
    ConnectorOperation::ListRecordings,
    ConnectorOperation::GetActiveRecording,
    ConnectorOperation::IsRecordingActive,
]);

#[derive(Debug, Clone)]
pub(crate) struct TcsSettings {
    pub recording_alias: Option<String>,
    pub bitrate: String,
    pub recordings_prefix: String,
    pub recording_name_pattern: Regex,
    pub recordings_check_period: Duration,
    pub transfer_workers: usize,
    pub folder_delete_timeout: Duration,
    pub max_resumes: u32,
}

impl TcsSettings {
    fn from_options(options: &ConnectorOptions) -> ConfigResult<Self> {
        let recordings_prefix = options.string_or(keys::RECORDINGS_PREFIX, defaults::RECORDINGS_PREFIX);
        let recording_name_pattern = match options.pattern(keys::RECORDING_NAME_PATTERN)? {
            Some(pattern) => pattern,
            None => Regex::new(&format!("^{}", regex::escape(&recordings_prefix))).map_err(|error| {
                ConfigurationError::invalid_value(keys::RECORDINGS_PREFIX, recordings_prefix.clone(), error.to_string())
            })?,
        };
        Ok(Self {
            recording_alias: options.string(keys::ALIAS).map(str::to_string),
            bitrate: options.string_or(keys::BITRATE, defaults::BITRATE),
            recordings_prefix,
            recording_name_pattern,
            recordings_check_period: options
                .duration(keys::RECORDINGS_CHECK_PERIOD, defaults::RECORDINGS_CHECK_PERIOD)?,
            transfer_workers: options
                .u32_or(keys::TRANSFER_WORKERS, defaults::TRANSFER_WORKERS)?
                .max(1) as usize,
            folder_delete_timeout: options
                .duration(keys::FOLDER_DELETE_TIMEOUT, defaults::FOLDER_DELETE_TIMEOUT)?,
            max_resumes: defaults::MAX_TRANSFER_RESUMES,
        })
    }
}

pub(crate) struct TcsInner<H> {
    pub device_id: String,
    pub settings: TcsSettings,
    pub exchange: H,
    pub controller: ControllerClient,
    pub storage: Arc<dyn Storage>,
    pub state: ConnectionStateCell,
    /// Held for the whole request cycle, serializing calls to the device
    pub endpoint: tokio::sync::Mutex<Endpoint>,
    pub transfers: TransferPool,
    pub tasks: BackgroundTasks,
}

pub struct CiscoTcsConnector<H: HttpExchange = ReqwestExchange> {
    inner: Arc<TcsInner<H>>,
}

impl CiscoTcsConnector<ReqwestExchange> {
    pub fn new(
        device_id: impl Into<String>,
        options: ConnectorOptions,
        controller: Arc<dyn ControllerChannel>,
        storage: Arc<dyn Storage>,
    ) -> CommandResult<Self> {
        let device_id = device_id.into();
        let timeout = options.duration(keys::TIMEOUT, defaults::TIMEOUT)?;
        let exchange = ReqwestExchange::new(device_id.clone(), timeout)?;
        Self::with_exchange(device_id, options, controller, storage, exchange)
    }
}

impl<H: HttpExchange> CiscoTcsConnector<H> {
    pub fn with_exchange(
        device_id: impl Into<String>,
        options: ConnectorOptions,
        controller: Arc<dyn ControllerChannel>,
        storage: Arc<dyn Storage>,
        exchange: H,
    ) -> CommandResult<Self> {
        let device_id = device_id.into();
        let settings = TcsSettings::from_options(&options)?;
        let ttl = options.duration(keys::CACHE_TTL, defaults::CACHE_TTL)?;
        Ok(Self {
            inner: Arc::new(TcsInner {
                controller: ControllerClient::new(controller, device_id.clone(), ttl),
                transfers: TransferPool::new(device_id.clone(), settings.transfer_workers),
                tasks: BackgroundTasks::new(device_id.clone()),
                device_id,
                settings,
                exchange,
                storage,
                state: ConnectionStateCell::new(),
                endpoint: tokio::sync::Mutex::new(Endpoint::default()),
            }),
        })
    }

    /// Run one reconciliation pass, queueing finished recordings for transfer
    pub async fn check_recordings(&self) {
        self.inner.check_recordings().await;
    }

    /// Recordings queued or being transferred
    pub fn pending_transfers(&self) -> usize {
        self.inner.transfers.len()
    }

    /// Wait until transfers into `folder_id` are done; false on timeout
    pub async fn wait_for_transfers(&self, folder_id: &str, timeout: Duration) -> bool {
        self.inner.transfers.wait_for_folder(folder_id, timeout).await
    }

    fn start_background_tasks(&self) {
        if !self.inner.tasks.try_start() {
            return;
        }
        self.inner.transfers.start(Arc::downgrade(&self.inner));
        self.inner.tasks.spawn_periodic(
            "recordings-check",
            self.inner.settings.recordings_check_period,
            Arc::downgrade(&self.inner),
            |inner: Arc<TcsInner<H>>| async move { inner.check_recordings().await },
        );
    }

    fn ensure_connected(&self) -> CommandResult<()> {
        if self.inner.state.get().is_connected() {
            Ok(())
        } else {
            Err(CommandError::not_connected(&self.inner.device_id))
        }
    }
}

#[async_trait]
impl<H: HttpExchange> Connector for CiscoTcsConnector<H> {
    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            device_id: self.inner.device_id.clone(),
            kind: ConnectorKind::CiscoTcs,
            address: self
                .inner
                .endpoint
                .try_lock()
                .ok()
                .and_then(|endpoint| endpoint.url.as_ref().map(ToString::to_string)),
            state: self.inner.state.get(),
        }
    }

    fn capabilities(&self) -> CapabilitySet {
        CAPABILITIES
    }

    async fn connect(&self, address: &DeviceAddress, credentials: &Credentials) -> CommandResult<()> {
        let inner = &self.inner;
        inner.state.set(ConnectionState::Connecting);
        info!(device_id = %inner.device_id, address = %address, "🔌 Connecting to content server");

        if let Err(error) = inner.open_endpoint(address, credentials).await {
            warn!(device_id = %inner.device_id, error = %error, "❌ Content server connection failed");
            inner.close_endpoint().await;
            inner.state.set(ConnectionState::Disconnected);
            return Err(error);
        }

        inner.state.set(ConnectionState::Connected);
        self.start_background_tasks();
        let endpoint = inner.address().await.unwrap_or_default();
        info!(device_id = %inner.device_id, endpoint = %endpoint, "✅ Content server connected");
        Ok(())
    }

    async fn disconnect(&self) -> CommandResult<()> {
        let inner = &self.inner;
        inner.state.set(ConnectionState::Disconnected);
        inner.tasks.shutdown().await;
        inner.transfers.shutdown().await;
        inner.close_endpoint().await;
        info!(device_id = %inner.device_id, "🔌 Content server disconnected");
        Ok(())
    }

    async fn create_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<String> {
        self.ensure_connected()?;
        self.inner.create_recording_folder(folder).await
    }

    async fn modify_recording_folder(&self, folder: &RecordingFolder) -> CommandResult<()> {
        self.ensure_connected()?;
        self.inner.modify_recording_folder(folder).await
    }

    async fn delete_recording_folder(&self, folder_id: &str) -> CommandResult<()> {
        self.ensure_connected()?;
        self.inner.delete_recording_folder(folder_id).await
    }

    async fn start_recording(&self, folder_id: &str, target: &RecordingTarget) -> CommandResult<String> {
        self.ensure_connected()?;
        self.inner.start_recording(folder_id, target).await
    }

    async fn stop_recording(&self, recording_id: &str) -> CommandResult<()> {
        self.ensure_connected()?;
        self.inner.stop_recording(recording_id).await
    }

    async fn delete_recording(&self, recording_id: &str) -> CommandResult<()> {
        self.ensure_connected()?;
        self.inner.delete_recording(recording_id).await
    }

    async fn list_recordings(&self, folder_id: &str) -> CommandResult<Vec<Recording>> {
        self.ensure_connected()?;
        self.inner.list_recordings(folder_id).await
    }

    async fn get_active_recording(&self, target: &RecordingTarget) -> CommandResult<Option<Recording>> {
        self.ensure_connected()?;
        self.inner.get_active_recording(target).await
    }

    async fn is_recording_active(&self, recording_id: &str) -> CommandResult<bool> {
        self.ensure_connected()?;
        self.inner.is_recording_active(recording_id).await
    }
}
