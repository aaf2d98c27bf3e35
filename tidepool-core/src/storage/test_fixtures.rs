//! Test fixtures for storage testing.
//!
//! Provides standardized scratch files and content so storage, transfer and
//! swarm tests share the same setup.

use std::path::PathBuf;

/// Deterministic, non-repeating-per-piece content of `len` bytes.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

/// Creates a temporary directory holding one file with the given content.
///
/// # Panics
///
/// Panics if temporary directory or file creation fails.
/// This is acceptable in test fixtures where failures indicate environment issues.
pub fn create_temp_file(name: &str, content: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (temp_dir, path)
}
