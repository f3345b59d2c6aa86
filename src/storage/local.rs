//! Filesystem-backed managed storage.
//!
//! Layout: one directory per folder under the root, named by folder id, with a
//! `.folder.json` descriptor holding the display name and permissions. Files are written
//! to a `.part` sibling and renamed into place once complete.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::{copy_resumable, FileSpec, ResumableSource, ResumeSupport, Storage, StorageError, StorageResult};
use crate::connector::FolderPermission;

const DESCRIPTOR: &str = ".folder.json";
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FolderDescriptor {
    name: String,
    permissions: Vec<(String, FolderPermission)>,
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    download_base: Option<String>,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, download_base: Option<String>) -> Self {
        Self {
            root: root.into(),
            download_base: download_base.map(|base| base.trim_end_matches('/').to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked(name: &str) -> StorageResult<&str> {
        let invalid = name.is_empty()
            || name.starts_with('.')
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if invalid {
            Err(StorageError::invalid_name(name))
        } else {
            Ok(name)
        }
    }

    fn folder_path(&self, folder_id: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(Self::checked(folder_id)?))
    }

    async fn existing_folder(&self, folder_id: &str) -> StorageResult<PathBuf> {
        let path = self.folder_path(folder_id)?;
        if fs::try_exists(path.join(DESCRIPTOR)).await? {
            Ok(path)
        } else {
            Err(StorageError::not_found(folder_id))
        }
    }

    async fn read_descriptor(&self, folder: &Path) -> StorageResult<FolderDescriptor> {
        let raw = fs::read(folder.join(DESCRIPTOR)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_descriptor(&self, folder: &Path, descriptor: &FolderDescriptor) -> StorageResult<()> {
        fs::write(folder.join(DESCRIPTOR), serde_json::to_vec_pretty(descriptor)?).await?;
        Ok(())
    }

    /// Display name of a folder
    pub async fn folder_name(&self, folder_id: &str) -> StorageResult<String> {
        let folder = self.existing_folder(folder_id).await?;
        Ok(self.read_descriptor(&folder).await?.name)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn create_folder(&self, name: &str) -> StorageResult<String> {
        let folder_id = uuid::Uuid::new_v4().simple().to_string();
        let folder = self.folder_path(&folder_id)?;
        fs::create_dir_all(&folder).await?;
        self.write_descriptor(
            &folder,
            &FolderDescriptor {
                name: name.to_string(),
                permissions: Vec::new(),
            },
        )
        .await?;
        info!(folder_id = %folder_id, name = %name, "📁 Storage folder created");
        Ok(folder_id)
    }

    async fn delete_folder(&self, folder_id: &str) -> StorageResult<()> {
        let folder = self.existing_folder(folder_id).await?;
        fs::remove_dir_all(&folder).await?;
        info!(folder_id = %folder_id, "🗑️ Storage folder deleted");
        Ok(())
    }

    async fn folder_exists(&self, folder_id: &str) -> StorageResult<bool> {
        let Ok(folder) = self.folder_path(folder_id) else {
            return Ok(false);
        };
        Ok(fs::try_exists(folder.join(DESCRIPTOR)).await?)
    }

    async fn set_folder_permissions(
        &self,
        folder_id: &str,
        permissions: &[(String, FolderPermission)],
    ) -> StorageResult<()> {
        let folder = self.existing_folder(folder_id).await?;
        let mut descriptor = self.read_descriptor(&folder).await?;
        descriptor.permissions = permissions.to_vec();
        self.write_descriptor(&folder, &descriptor).await
    }

    async fn create_file(
        &self,
        file: &FileSpec,
        source: &dyn ResumableSource,
        resume: ResumeSupport,
    ) -> StorageResult<u64> {
        let folder = self.existing_folder(&file.folder_id).await?;
        let name = Self::checked(&file.file_name)?;
        let target = folder.join(name);
        let partial = folder.join(format!("{name}{PARTIAL_SUFFIX}"));

        let mut writer = fs::File::create(&partial).await?;
        let written = match copy_resumable(source, &mut writer, resume).await {
            Ok(written) => written,
            Err(error) => {
                drop(writer);
                let _ = fs::remove_file(&partial).await;
                return Err(error);
            }
        };
        writer.sync_all().await?;
        drop(writer);
        fs::rename(&partial, &target).await?;

        debug!(folder_id = %file.folder_id, file = %name, bytes = written, "Storage file written");
        Ok(written)
    }

    async fn delete_file(&self, folder_id: &str, file_name: &str) -> StorageResult<()> {
        let folder = self.existing_folder(folder_id).await?;
        let path = folder.join(Self::checked(file_name)?);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(format!("{folder_id}/{file_name}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn list_files(&self, folder_id: &str, pattern: Option<&Regex>) -> StorageResult<Vec<String>> {
        let folder = self.existing_folder(folder_id).await?;
        let mut entries = fs::read_dir(&folder).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            if pattern.map_or(true, |pattern| pattern.is_match(&name)) {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn file_exists(&self, folder_id: &str, file_name: &str) -> StorageResult<bool> {
        let folder = self.existing_folder(folder_id).await?;
        Ok(fs::try_exists(folder.join(Self::checked(file_name)?)).await?)
    }

    async fn get_file_downloadable_url(&self, folder_id: &str, file_name: &str) -> StorageResult<Option<String>> {
        if !self.file_exists(folder_id, file_name).await? {
            return Err(StorageError::not_found(format!("{folder_id}/{file_name}")));
        }
        Ok(self.download_base.as_ref().map(|base| {
            let encoded: String = url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect();
            format!("{base}/{folder_id}/{encoded}")
        }))
    }
}
