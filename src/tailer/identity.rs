use serde::{Deserialize, Serialize};
use std::fs::Metadata;

/// Identity of the file behind a path, used to notice rotation.
///
/// On Unix this is (device, inode). Elsewhere there is no stable file id in
/// the standard library, so the volume is left at zero and the creation time
/// in nanoseconds stands in for the file id: a rotated-in replacement file
/// has a different creation time even when its name is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub volume: u64,
    pub file: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            volume: metadata.dev(),
            file: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        let created = metadata.created().ok()?;
        let nanos = created
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_nanos() as u64;
        Some(Self {
            volume: 0,
            file: nanos,
        })
    }
}
