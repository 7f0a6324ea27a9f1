//! Line-oriented append writer.
//!
//! Every line opens the file in append mode, writes and closes it again, so
//! a crash never loses more than the line being written and no handle is
//! held between observations.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends whole lines to a file.
#[derive(Debug, Clone)]
pub struct LineWriter {
    path: PathBuf,
}

impl LineWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Truncate (or create) the file and write `header` as its first line.
    pub fn create_with_header(path: impl Into<PathBuf>, header: &str) -> io::Result<Self> {
        let writer = Self::new(path);
        let mut file = fs::File::create(&writer.path)?;
        writeln!(file, "{}", header)?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line; the trailing newline is added here.
    pub fn append_line(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

/// Rename an existing file to `<file>.bak.<epoch_ms>`.
///
/// Returns the backup path, or `None` when there was nothing to back up.
pub fn backup_file_if_exists(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);

    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak.{}", epoch_ms));
    let backup = PathBuf::from(name);

    fs::rename(path, &backup)?;
    Ok(Some(backup))
}
