use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry of paths currently being tailed.
///
/// At most one [`Lease`] exists per absolute path; it is released on drop.
#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim exclusive tailing rights for `path`, or `None` if already held
    pub fn try_acquire(&self, path: &Path) -> Option<Lease> {
        let mut held = self.held.lock();
        if held.insert(path.to_path_buf()) {
            Some(Lease {
                path: path.to_path_buf(),
                held: Arc::clone(&self.held),
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, path: &Path) -> bool {
        self.held.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive claim on one path
#[derive(Debug)]
pub struct Lease {
    path: PathBuf,
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Lease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held.lock().remove(&self.path);
    }
}
