use std::path::PathBuf;

use async_trait::async_trait;

use fedlink_core::avatar::detect_image_format;
use fedlink_core::FederationError;

use crate::collaborators::{AvatarStorage, OwnerRef};

/// Filesystem avatar storage.
///
/// One file per owner at `{dir}/{kind}-{id}.{ext}`; a new avatar for the
/// same owner overwrites the old one. Stale files with a different
/// extension are removed so an owner never accumulates more than one blob.
pub struct FsAvatarStorage {
    dir: PathBuf,
}

const KNOWN_EXTENSIONS: &[&str] = &["jpg", "png", "gif", "webp"];

impl FsAvatarStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FsAvatarStorage { dir: dir.into() }
    }

    fn file_name(owner: &OwnerRef, ext: &str) -> String {
        format!("{}-{}.{}", owner.kind, owner.id, ext)
    }
}

#[async_trait]
impl AvatarStorage for FsAvatarStorage {
    async fn store(
        &self,
        owner: &OwnerRef,
        bytes: &[u8],
        mime: &str,
    ) -> Result<(), FederationError> {
        let ext = detect_image_format(bytes)
            .map(|(ext, _)| ext)
            .ok_or_else(|| FederationError::storage(format!("unrecognized avatar bytes ({mime})")))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(FederationError::storage)?;

        let path = self.dir.join(Self::file_name(owner, ext));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(FederationError::storage)?;

        for stale_ext in KNOWN_EXTENSIONS.iter().filter(|e| **e != ext) {
            let stale = self.dir.join(Self::file_name(owner, stale_ext));
            if tokio::fs::try_exists(&stale).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::remove_file(&stale).await {
                    log::warn!("Could not remove stale avatar {}: {e}", stale.display());
                }
            }
        }

        Ok(())
    }
}
