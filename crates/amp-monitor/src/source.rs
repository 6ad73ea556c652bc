//! Where the host reads the status record from.
//!
//! On the target this is `/dev/mem` at the physical address of the status
//! region. Any other readable file works too, such as an image written by
//! the `simulate` command, with the record at a chosen byte offset. Both are
//! opened `O_SYNC` and read through a read-only mapping.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use amp_core::{observe, Observation, RECORD_SIZE, SHARED_STATUS_ADDR};

use crate::mapping::PageMapping;

/// Default device holding physical memory.
pub const DEFAULT_DEVICE: &str = "/dev/mem";

/// Default byte offset of the record inside [`DEFAULT_DEVICE`].
pub const DEFAULT_ADDRESS: u64 = SHARED_STATUS_ADDR as u64;

/// Failure to obtain a record image.
#[derive(Debug)]
pub enum SourceError {
    /// The device could not be opened.
    Open {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Mapping the page that holds the record failed.
    Map {
        /// Device path.
        path: PathBuf,
        /// Requested offset.
        offset: u64,
        /// Underlying error.
        source: io::Error,
    },
    /// The file ends before a full record.
    Read {
        /// Device path.
        path: PathBuf,
        /// Requested offset.
        offset: u64,
        /// Underlying error.
        source: io::Error,
    },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "cannot open {}: {source}", path.display())?;
                if source.kind() == io::ErrorKind::PermissionDenied {
                    write!(f, " (reading physical memory requires root)")?;
                }
                Ok(())
            }
            Self::Map {
                path,
                offset,
                source,
            } => write!(f, "cannot map {} at {offset:#x}: {source}", path.display()),
            Self::Read {
                path,
                offset,
                source,
            } => write!(
                f,
                "cannot read {RECORD_SIZE} bytes from {} at {offset:#x}: {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Map { source, .. } | Self::Read { source, .. } => {
                Some(source)
            }
        }
    }
}

/// A file plus the byte offset of the status record inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSource {
    path: PathBuf,
    offset: u64,
}

impl Default for RecordSource {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE, DEFAULT_ADDRESS)
    }
}

impl RecordSource {
    /// Creates a source for the record at `offset` in `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, offset: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset,
        }
    }

    /// Device path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the record.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Copies one record image. The file is reopened and remapped on every
    /// call so a watch loop always sees fresh memory.
    ///
    /// Regular files are length-checked first, since touching a mapping
    /// past the end of a file raises `SIGBUS`. Devices are mapped as is.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the file cannot be opened, is too
    /// short or cannot be mapped.
    pub fn read_image(&self) -> Result<[u8; RECORD_SIZE], SourceError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
            .map_err(|source| SourceError::Open {
                path: self.path.clone(),
                source,
            })?;

        let metadata = file.metadata().map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        let end = self.offset.saturating_add(RECORD_SIZE as u64);
        if metadata.is_file() && metadata.len() < end {
            return Err(SourceError::Read {
                path: self.path.clone(),
                offset: self.offset,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file is only {} bytes", metadata.len()),
                ),
            });
        }

        let mapping =
            PageMapping::new(&file, self.offset, RECORD_SIZE).map_err(|source| {
                SourceError::Map {
                    path: self.path.clone(),
                    offset: self.offset,
                    source,
                }
            })?;
        Ok(mapping.copy_out())
    }

    /// Reads and classifies one record.
    ///
    /// # Errors
    ///
    /// See [`Self::read_image`].
    pub fn observe(&self) -> Result<Observation, SourceError> {
        let image = self.read_image()?;
        log::debug!(
            "read {RECORD_SIZE} bytes from {} at {:#x}",
            self.path.display(),
            self.offset
        );
        Ok(observe(&image))
    }
}
