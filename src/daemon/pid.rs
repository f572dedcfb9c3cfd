// PID file tracking the process that currently serves

use crate::error::{ForemanError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// PID file that follows the serving process across reloads
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        self.write_pid(std::process::id())
    }

    /// Write an arbitrary PID, e.g. the replacement started by a reload
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ForemanError::PidFileError(format!("Failed to create PID directory: {}", e))
                })?;
            }
        }

        fs::write(&self.path, pid.to_string())
            .map_err(|e| ForemanError::PidFileError(format!("Failed to write PID file: {}", e)))
    }

    /// Read the PID from the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| ForemanError::PidFileError(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| ForemanError::PidFileError(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the file only if it still names `pid`
    ///
    /// After a reload the file names the replacement, which must keep it.
    /// Returns whether the file was removed.
    pub fn remove_if_owned(&self, pid: u32) -> Result<bool> {
        if !self.exists() {
            return Ok(false);
        }

        match self.read() {
            Ok(current) if current == pid => {
                fs::remove_file(&self.path).map_err(|e| {
                    ForemanError::PidFileError(format!("Failed to remove PID file: {}", e))
                })?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
