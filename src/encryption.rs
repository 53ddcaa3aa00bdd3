//! Output encryption policy
//!
//! Security posture is binary: a job either names a password and the output is
//! encrypted with a fixed set of reader permissions, or it is saved in the clear.

use std::path::{Path, PathBuf};
use bitflags::bitflags;

bitflags! {
    /// Reader capabilities granted under password encryption.
    ///
    /// Bit positions follow the PDF standard security handler `/P` entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        /// Bit 3: print the document
        const PRINT = 1 << 2;
        /// Bit 5: copy text and graphics
        const COPY = 1 << 4;
        /// Bit 6: add or modify annotations
        const ANNOTATE = 1 << 5;
        /// Bit 10: extract content for accessibility tools
        const ACCESSIBILITY = 1 << 9;
    }
}

/// Password plus the permissions the output is saved with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub password: String,
    pub permissions: Permissions,
}

/// Everything the engine needs to write the output once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub path: PathBuf,
    pub encryption: Option<EncryptionRequest>,
}

/// Derives the save request from the job's password setting
pub struct EncryptionPolicy;

impl EncryptionPolicy {
    /// The only permission set ever granted
    pub fn fixed_permissions() -> Permissions {
        Permissions::ACCESSIBILITY | Permissions::PRINT | Permissions::COPY | Permissions::ANNOTATE
    }

    /// Encryption request for an optional password; `None` means a plain save
    pub fn request_for(password: Option<&str>) -> Option<EncryptionRequest> {
        password.filter(|p| !p.is_empty()).map(|password| EncryptionRequest {
            password: password.to_string(),
            permissions: Self::fixed_permissions(),
        })
    }

    /// Package the output path and encryption into one save request
    pub fn save_request(path: &Path, password: Option<&str>) -> SaveRequest {
        SaveRequest {
            path: path.to_path_buf(),
            encryption: Self::request_for(password),
        }
    }
}
