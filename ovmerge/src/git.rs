use std::io;
use std::process::Command;

use dts_tree::{DtsError, FileOpener, Result};

/// Opens files from a git branch instead of the working tree, so an overlay
/// can be merged exactly as committed.
pub struct GitFiles {
    branch: String,
}

impl GitFiles {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }

    fn object(&self, path: &str) -> String {
        format!("{}:./{}", self.branch, path)
    }
}

impl FileOpener for GitFiles {
    fn open(&self, path: &str) -> Result<String> {
        let output = Command::new("git")
            .args(["show", &self.object(path)])
            .output()
            .map_err(|source| DtsError::Io {
                path: path.to_string(),
                source,
            })?;
        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(DtsError::Io {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, message),
            });
        }
        String::from_utf8(output.stdout).map_err(|err| DtsError::Io {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidData, err),
        })
    }

    fn exists(&self, path: &str) -> bool {
        Command::new("git")
            .args(["cat-file", "-e", &self.object(path)])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}
