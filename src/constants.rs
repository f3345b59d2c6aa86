//! # System Constants
//!
//! Connector option keys and their defaults, shared by the connector implementations
//! and the configuration documentation.

use std::time::Duration;

/// Keys understood in a connector's `options` table
pub mod options {
    pub const TIMEOUT: &str = "timeout";
    pub const MEETINGS_FOLDER_NAME: &str = "meetings-folder-name";
    pub const RECORDINGS_FOLDER_NAME: &str = "recordings-folder-name";
    pub const RECORDINGS_PREFIX: &str = "recordings-prefix";
    pub const RECORDING_NAME_PATTERN: &str = "recording-name-pattern";
    pub const URL_PATH_PREFIX: &str = "url-path-prefix";
    pub const CAPACITY_CHECK_PERIOD: &str = "capacity-check-period";
    pub const RECORDINGS_CHECK_PERIOD: &str = "recordings-check-period";
    pub const RECORDING_POLL_INTERVAL: &str = "recording-poll-interval";
    pub const RECORDING_POLL_ATTEMPTS: &str = "recording-poll-attempts";
    pub const STORAGE: &str = "storage";
    pub const STORAGE_URL: &str = "storage-url";
    pub const ALIAS: &str = "alias";
    pub const BITRATE: &str = "bitrate";
    pub const TRANSFER_WORKERS: &str = "transfer-workers";
    pub const FOLDER_DELETE_TIMEOUT: &str = "folder-delete-timeout";
    pub const CACHE_TTL: &str = "cache-ttl";
}

/// Defaults applied when an option is absent
pub mod defaults {
    use super::Duration;

    pub const TIMEOUT: Duration = Duration::from_secs(30);
    pub const MEETINGS_FOLDER_NAME: &str = "meetings";
    pub const RECORDINGS_FOLDER_NAME: &str = "recordings";
    pub const RECORDINGS_PREFIX: &str = "broker_";
    pub const URL_PATH_PREFIX: &str = "broker-";
    pub const CAPACITY_CHECK_PERIOD: Duration = Duration::from_secs(60);
    pub const RECORDINGS_CHECK_PERIOD: Duration = Duration::from_secs(300);
    pub const RECORDING_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const RECORDING_POLL_ATTEMPTS: u32 = 5;
    pub const BITRATE: &str = "768";
    pub const TRANSFER_WORKERS: u32 = 2;
    pub const FOLDER_DELETE_TIMEOUT: Duration = Duration::from_secs(600);
    pub const CACHE_TTL: Duration = Duration::from_secs(300);
    pub const CACHE_CAPACITY: usize = 1024;
    pub const MAX_TRANSFER_RESUMES: u32 = 5;
}

/// Suffix of the metadata sidecar written next to a relocated recording
pub const METADATA_SIDECAR_SUFFIX: &str = "_metadata.xml";
