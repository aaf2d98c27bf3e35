//! File-based piece storage backed by a single flat file

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;

use super::{PieceLayout, PieceStore, StorageError};
use crate::swarm::PieceIndex;

/// File system-based storage of one shared file.
///
/// Seeders read straight from the target file. Downloads write into
/// `<target><suffix>` and are renamed to the target once every piece is
/// owned. The current path sits behind a lock so the rename cannot race an
/// open in progress.
pub struct FileStorage {
    current_path: RwLock<PathBuf>,
    final_path: PathBuf,
    layout: PieceLayout,
}

impl FileStorage {
    /// Opens an existing, complete file for serving.
    ///
    /// # Errors
    ///
    /// - `StorageError::EmptyFile` - If the file has no content
    /// - `StorageError::Io` - If the file cannot be inspected
    pub async fn open_complete(path: &Path, piece_size: u64) -> Result<Self, StorageError> {
        let file_size = fs::metadata(path).await?.len();
        if file_size == 0 {
            return Err(StorageError::EmptyFile {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            current_path: RwLock::new(path.to_path_buf()),
            final_path: path.to_path_buf(),
            layout: PieceLayout::new(file_size, piece_size)?,
        })
    }

    /// Creates (or reuses) the preallocated in-progress file for a download.
    ///
    /// # Errors
    ///
    /// - `StorageError::InvalidLayout` - If the sizes cannot form a layout
    /// - `StorageError::Io` - If the file cannot be created or sized
    pub async fn create_download(
        final_path: &Path,
        file_size: u64,
        piece_size: u64,
        temp_suffix: &str,
    ) -> Result<Self, StorageError> {
        let layout = PieceLayout::new(file_size, piece_size)?;
        let temp_path = incomplete_path(final_path, temp_suffix);
        preallocate(&temp_path, file_size).await?;

        Ok(Self {
            current_path: RwLock::new(temp_path),
            final_path: final_path.to_path_buf(),
            layout,
        })
    }

    /// Path the data currently lives at.
    pub async fn current_path(&self) -> PathBuf {
        self.current_path.read().await.clone()
    }

    /// Canonical path of the finished file.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Renames the in-progress file to its canonical name.
    ///
    /// No-op when the data already lives at the final path.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the rename failed
    pub async fn finalize(&self) -> Result<PathBuf, StorageError> {
        let mut current = self.current_path.write().await;
        if *current != self.final_path {
            fs::rename(&*current, &self.final_path).await?;
            tracing::info!(
                "Renamed {} to {}",
                current.display(),
                self.final_path.display()
            );
            *current = self.final_path.clone();
        }
        Ok(self.final_path.clone())
    }
}

#[async_trait]
impl PieceStore for FileStorage {
    fn layout(&self) -> PieceLayout {
        self.layout
    }

    async fn read_piece(&self, index: PieceIndex) -> Result<Vec<u8>, StorageError> {
        let expected = self.layout.checked_size(index)?;
        let path = self.current_path.read().await;

        let mut file = fs::File::open(&*path).await?;
        file.seek(SeekFrom::Start(self.layout.offset(index))).await?;

        let mut piece_bytes = vec![0u8; expected as usize];
        match file.read_exact(&mut piece_bytes).await {
            Ok(_) => Ok(piece_bytes),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(StorageError::ShortRead { index, expected })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_piece(&self, index: PieceIndex, piece_bytes: &[u8]) -> Result<(), StorageError> {
        let expected = self.layout.checked_size(index)?;
        if piece_bytes.len() as u64 != expected {
            return Err(StorageError::SizeMismatch {
                index,
                expected,
                actual: piece_bytes.len() as u64,
            });
        }

        let path = self.current_path.read().await;
        let mut file = OpenOptions::new().write(true).open(&*path).await?;
        file.seek(SeekFrom::Start(self.layout.offset(index))).await?;
        file.write_all(piece_bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Path used for a download before it completes.
pub fn incomplete_path(final_path: &Path, suffix: &str) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Ensures a file of exactly `size` bytes exists at `path`.
///
/// Creates missing parent directories. A file that already has the right
/// size is left untouched; otherwise it is created or resized in place.
///
/// # Errors
///
/// - `StorageError::Io` - If the file cannot be created or resized
pub async fn preallocate(path: &Path, size: u64) -> Result<(), StorageError> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.len() == size => {
            tracing::debug!("{} already preallocated ({} bytes)", path.display(), size);
            return Ok(());
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.set_len(size).await?;
    tracing::info!("Preallocated {} ({} bytes)", path.display(), size);
    Ok(())
}
