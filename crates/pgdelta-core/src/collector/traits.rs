//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets the host statistics source read the real
//! `/proc` filesystem on Linux or an in-memory fixture in tests.

use std::io;
use std::path::Path;

/// Abstraction for filesystem reads.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_real_fs_read_to_string() {
        let fs = RealFs::new();
        // The crate manifest is always present next to src/
        let manifest = env::current_dir().unwrap().join("Cargo.toml");
        let content = fs.read_to_string(&manifest).unwrap();
        assert!(content.contains("[package]"));
    }

    #[test]
    fn test_real_fs_missing_file_is_an_error() {
        let fs = RealFs::new();
        assert!(fs.read_to_string(Path::new("/nonexistent/path/12345")).is_err());
    }
}
