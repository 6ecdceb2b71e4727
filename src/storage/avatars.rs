// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Profile image storage.
//!
//! Uploads are validated when an [`AvatarUpload`] is built, so an unsupported
//! or oversized file never reaches an [`AvatarUploader`]. The file-system
//! uploader writes through a temp file and renames it into place.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::IdentityError;

/// Largest accepted profile image (5 MiB).
pub const MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Profile image is empty")]
    Empty,

    #[error("Unsupported profile image type: {0}")]
    UnsupportedType(String),

    #[error("Profile image is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<UploadError> for IdentityError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Io(err) => {
                tracing::error!(error = %err, "Avatar write failed");
                IdentityError::unavailable("Avatar storage is unavailable")
            }
            other => IdentityError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl AvatarFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::Webp),
            "image/gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }
}

/// A validated profile image.
#[derive(Debug, Clone)]
pub struct AvatarUpload {
    bytes: Vec<u8>,
    format: AvatarFormat,
}

impl AvatarUpload {
    pub fn new(bytes: Vec<u8>, content_type: &str) -> Result<Self, UploadError> {
        let format = AvatarFormat::from_content_type(content_type)
            .ok_or_else(|| UploadError::UnsupportedType(content_type.to_string()))?;
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > MAX_AVATAR_BYTES {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                max: MAX_AVATAR_BYTES,
            });
        }
        Ok(Self { bytes, format })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Object storage for profile images; returns a reference to store on the
/// account.
#[async_trait]
pub trait AvatarUploader: Send + Sync {
    async fn store(&self, upload: AvatarUpload) -> Result<String, UploadError>;
}

/// Writes avatars under `<data_dir>/avatars/`.
#[derive(Debug, Clone)]
pub struct FileAvatarStore {
    dir: PathBuf,
}

impl FileAvatarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write_blocking(dir: PathBuf, upload: AvatarUpload) -> Result<String, UploadError> {
        fs::create_dir_all(&dir)?;

        let file_name = format!("{}.{}", Uuid::new_v4(), upload.format.extension());
        let path = dir.join(&file_name);

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&upload.bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;

        Ok(format!("avatars/{file_name}"))
    }
}

#[async_trait]
impl AvatarUploader for FileAvatarStore {
    async fn store(&self, upload: AvatarUpload) -> Result<String, UploadError> {
        let dir = self.dir.clone();
        let size = upload.len();
        let reference = tokio::task::spawn_blocking(move || Self::write_blocking(dir, upload))
            .await
            .map_err(|e| UploadError::Io(io::Error::other(e.to_string())))??;

        tracing::debug!(reference = %reference, size, "Stored avatar");
        Ok(reference)
    }
}
