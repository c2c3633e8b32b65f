//! External shutdown requests.
//!
//! Main and isolated applications create a request listener at startup: a
//! marker-file signal next to the instance lock (but distinct from it). A
//! second process asking the application to leave touches the marker file;
//! the run loop polls for it.

use std::path::{Path, PathBuf};

use sdv_object::declare_interface;

/// Capability through which a shutdown of the application is requested.
pub trait AppShutdownRequest: Send + Sync {
    fn request_shutdown(&self);
}

declare_interface!(AppShutdownRequest, "sdv.app.AppShutdownRequest");

/// Marker-file listener for shutdown requests.
pub struct ShutdownRequestListener {
    path: PathBuf,
}

impl ShutdownRequestListener {
    fn marker_path(dir: &Path, instance: u32) -> PathBuf {
        dir.join(format!("sdv_shutdown_{instance}.req"))
    }

    /// Create the listener. A marker left behind by an earlier process is
    /// cleared so it cannot trigger an immediate shutdown.
    pub fn new(dir: &Path, instance: u32) -> std::io::Result<Self> {
        let path = Self::marker_path(dir, instance);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(ShutdownRequestListener { path })
    }

    /// Whether a request has arrived; consumes the marker.
    pub fn triggered(&self) -> bool {
        if self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
            true
        } else {
            false
        }
    }

    /// Ask a listening process with the same directory and instance id to
    /// shut down.
    pub fn trigger(dir: &Path, instance: u32) -> std::io::Result<()> {
        std::fs::write(Self::marker_path(dir, instance), b"shutdown\n")
    }
}

impl Drop for ShutdownRequestListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_observed_once() {
        let dir = tempfile::tempdir().unwrap();
        let listener = ShutdownRequestListener::new(dir.path(), 1000).unwrap();
        assert!(!listener.triggered());

        ShutdownRequestListener::trigger(dir.path(), 1000).unwrap();
        assert!(listener.triggered());
        assert!(!listener.triggered());
    }

    #[test]
    fn stale_marker_is_cleared_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        ShutdownRequestListener::trigger(dir.path(), 7).unwrap();
        let listener = ShutdownRequestListener::new(dir.path(), 7).unwrap();
        assert!(!listener.triggered());
    }
}
