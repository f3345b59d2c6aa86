//! Interrupted transfers into local storage

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::VecDeque;

use conference_broker::storage::{
    ByteStream, BytesSource, FileSpec, LocalStorage, ResumableSource, ResumeSupport, Storage, StorageError,
    StorageResult,
};

const MAX_RESUMES: u32 = 5;

/// Source whose connection drops at fixed absolute offsets, once per offset
struct FlakySource {
    data: Bytes,
    chunk_size: usize,
    drops: Mutex<VecDeque<usize>>,
    opened_at: Mutex<Vec<u64>>,
}

impl FlakySource {
    fn new(data: Vec<u8>, chunk_size: usize, mut drops: Vec<usize>) -> Self {
        drops.sort_unstable();
        Self {
            data: Bytes::from(data),
            chunk_size: chunk_size.max(1),
            drops: Mutex::new(drops.into()),
            opened_at: Mutex::new(Vec::new()),
        }
    }

    fn opened_at(&self) -> Vec<u64> {
        self.opened_at.lock().clone()
    }
}

#[async_trait]
impl ResumableSource for FlakySource {
    async fn open(&self, offset: u64) -> StorageResult<ByteStream> {
        self.opened_at.lock().push(offset);
        let start = offset as usize;
        let drop_at = self.drops.lock().pop_front();
        let end = drop_at.unwrap_or(self.data.len()).min(self.data.len());

        let mut items: Vec<std::io::Result<Bytes>> = self
            .data
            .slice(start..end)
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if drop_at.is_some() {
            items.push(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

/// Payload plus drop offsets inside it
fn transfer_strategy(max_drops: usize) -> impl Strategy<Value = (Vec<u8>, usize, Vec<usize>)> {
    (prop::collection::vec(any::<u8>(), 1..4096), 1usize..512).prop_flat_map(move |(data, chunk)| {
        let len = data.len();
        (
            Just(data),
            Just(chunk),
            prop::collection::vec(0..=len, 0..=max_drops),
        )
    })
}

async fn fresh_folder(dir: &tempfile::TempDir) -> (LocalStorage, String) {
    let storage = LocalStorage::new(dir.path(), None);
    let folder = storage.create_folder("transfers").await.unwrap();
    (storage, folder)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resumed_transfer_is_byte_identical((data, chunk, drops) in transfer_strategy(MAX_RESUMES as usize)) {
        let dir = tempfile::tempdir().unwrap();
        let source = FlakySource::new(data.clone(), chunk, drops.clone());

        let (written, stored) = tokio_test::block_on(async {
            let (storage, folder) = fresh_folder(&dir).await;
            let written = storage
                .create_file(
                    &FileSpec::new(folder.clone(), "media.mp4"),
                    &source,
                    ResumeSupport::Enabled { max_resumes: MAX_RESUMES },
                )
                .await
                .unwrap();
            let stored = std::fs::read(dir.path().join(&folder).join("media.mp4")).unwrap();
            (written, stored)
        });

        prop_assert_eq!(written, data.len() as u64);
        prop_assert_eq!(stored, data);

        let mut expected = vec![0u64];
        let mut sorted = drops;
        sorted.sort_unstable();
        expected.extend(sorted.into_iter().map(|offset| offset as u64));
        prop_assert_eq!(source.opened_at(), expected);
    }

    #[test]
    fn too_many_drops_leave_nothing_behind(
        (data, chunk, drops) in transfer_strategy(MAX_RESUMES as usize + 4)
            .prop_filter("more drops than resumes", |(_, _, drops)| drops.len() > MAX_RESUMES as usize)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let source = FlakySource::new(data, chunk, drops.clone());

        let (result, files) = tokio_test::block_on(async {
            let (storage, folder) = fresh_folder(&dir).await;
            let result = storage
                .create_file(
                    &FileSpec::new(folder.clone(), "media.mp4"),
                    &source,
                    ResumeSupport::Enabled { max_resumes: MAX_RESUMES },
                )
                .await;
            let files: Vec<String> = std::fs::read_dir(dir.path().join(&folder))
                .unwrap()
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| !name.starts_with(".folder"))
                .collect();
            (result, files)
        });

        let mut sorted = drops;
        sorted.sort_unstable();
        let failed_at = sorted[MAX_RESUMES as usize] as u64;
        prop_assert_eq!(result, Err(StorageError::Interrupted {
            offset: failed_at,
            message: "connection reset by peer".to_string(),
        }));
        prop_assert!(files.is_empty(), "left behind: {:?}", files);
        prop_assert_eq!(source.opened_at().len(), MAX_RESUMES as usize + 1);
    }
}

#[tokio::test]
async fn test_failed_replacement_keeps_the_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let (storage, folder) = fresh_folder(&dir).await;
    let spec = FileSpec::new(folder.clone(), "media.mp4");
    storage
        .create_file(&spec, &BytesSource::new(&b"previous"[..]), ResumeSupport::Disabled)
        .await
        .unwrap();

    let source = FlakySource::new(b"replacement".to_vec(), 4, vec![6]);
    let error = storage
        .create_file(&spec, &source, ResumeSupport::Disabled)
        .await
        .unwrap_err();
    assert!(matches!(error, StorageError::Interrupted { offset: 6, .. }));
    assert_eq!(source.opened_at(), vec![0]);
    assert_eq!(
        std::fs::read(dir.path().join(&folder).join("media.mp4")).unwrap(),
        b"previous"
    );
}

#[tokio::test]
async fn test_writing_into_a_missing_folder_fails() {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::new(dir.path(), None);
    let result = storage
        .create_file(
            &FileSpec::new("missing", "media.mp4"),
            &BytesSource::new(&b"media"[..]),
            ResumeSupport::Disabled,
        )
        .await;
    assert!(matches!(result, Err(StorageError::NotFound { .. })));
}
