//! Helper functions for tempfile usage in tests

use std::io::Write;

use anyhow::Context;

/// Create a temp directory with a helpful error message.
pub fn create_temp_dir() -> anyhow::Result<tempfile::TempDir> {
    tempfile::tempdir().context("Failed to create temporary directory for test")
}

/// Write `contents` to a fresh `.json` temp file
pub fn write_temp_json(contents: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::with_suffix(".json")
        .context("Failed to create temporary config file")?;
    file.write_all(contents.as_bytes())
        .context("Failed to write temporary config file")?;
    file.flush()?;
    Ok(file)
}
