//! Image decoding.
//!
//! The loader is the only component that touches image files. It decodes a
//! path into a full-resolution luma plane; the hash functions resample that
//! plane to their own working size, so one decode serves all three algorithms.

use std::io;
use std::path::{Path, PathBuf};

use image::error::{ParameterError, ParameterErrorKind};
use image::{GrayImage, ImageError, ImageReader};

use super::grid::to_luma;
use crate::error::code;

/// Errors that can occur while decoding an image.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The file does not exist.
    #[error("Image not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The file is not in a supported raster format.
    #[error("Unsupported image format for {path}: {source}")]
    Unsupported {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    /// The format was recognised but the data could not be decoded.
    #[error("Corrupt image {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DecodeError {
    /// Stable numeric code, shared with the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound(_) => code::NOT_FOUND,
            Self::PermissionDenied(_) => code::PERMISSION_DENIED,
            Self::Unsupported { .. } => code::UNSUPPORTED,
            Self::Corrupt { .. } => code::CORRUPT,
            Self::Io { .. } => code::IO,
        }
    }

    /// Path of the image that failed.
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(path) | Self::PermissionDenied(path) => path,
            Self::Unsupported { path, .. } | Self::Corrupt { path, .. } | Self::Io { path, .. } => {
                path
            }
        }
    }

    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    fn from_image(path: &Path, source: ImageError) -> Self {
        match source {
            // Truncated or malformed streams surface as I/O errors from some decoders
            ImageError::IoError(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
                ) =>
            {
                Self::Corrupt {
                    path: path.to_path_buf(),
                    source: ImageError::IoError(e),
                }
            }
            ImageError::IoError(e) => Self::from_io(path, e),
            ImageError::Unsupported(_) => Self::Unsupported {
                path: path.to_path_buf(),
                source,
            },
            _ => Self::Corrupt {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Decodes an image file into a luma plane.
///
/// Implementations must be usable from many threads at once.
pub trait ImageLoader: Send + Sync {
    /// Decode `path` into a full-resolution, single-channel luma plane.
    fn load(&self, path: &Path) -> Result<GrayImage, DecodeError>;
}

/// Loader backed by the `image` crate.
///
/// The format is guessed from the file contents first and the extension
/// second, so a misnamed file still decodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLoader;

impl StandardLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ImageLoader for StandardLoader {
    fn load(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        let metadata = std::fs::metadata(path).map_err(|e| DecodeError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(DecodeError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        let image = ImageReader::open(path)
            .map_err(|e| DecodeError::from_io(path, e))?
            .with_guessed_format()
            .map_err(|e| DecodeError::from_io(path, e))?
            .decode()
            .map_err(|e| DecodeError::from_image(path, e))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::Corrupt {
                path: path.to_path_buf(),
                source: ImageError::Parameter(ParameterError::from_kind(
                    ParameterErrorKind::DimensionMismatch,
                )),
            });
        }

        log::trace!(
            "Decoded {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(to_luma(&image))
    }
}
