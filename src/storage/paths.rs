// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the data directory layout.

use std::path::{Path, PathBuf};

/// Default data directory, relative to the working directory.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities for the data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Embedded account database file.
    pub fn accounts_db(&self) -> PathBuf {
        self.root.join("accounts.redb")
    }

    /// Directory containing uploaded avatars.
    pub fn avatars_dir(&self) -> PathBuf {
        self.root.join("avatars")
    }

    /// Path to a specific avatar file.
    pub fn avatar(&self, file_name: &str) -> PathBuf {
        self.avatars_dir().join(file_name)
    }
}
