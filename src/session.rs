//! Upload session
//!
//! Collects the files a user picked, rejecting unsupported ones before they
//! reach the pipeline.

use crate::services::ImageIOService;
use std::path::{Component, Path, PathBuf};

/// Ordered, de-duplicated list of accepted input files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSession {
    files: Vec<PathBuf>,
}

/// Files turned away by [`UploadSession::add_files`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rejected {
    pub files: Vec<PathBuf>,
}

impl Rejected {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File names joined for a warning message
    #[must_use]
    pub fn names(&self) -> String {
        self.files
            .iter()
            .map(|path| {
                path.file_name()
                    .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl UploadSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add files, keeping the first occurrence of each normalized path
    ///
    /// Files whose extension is not supported are returned instead of added.
    pub fn add_files<I, P>(&mut self, paths: I) -> Rejected
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut rejected = Rejected::default();
        for path in paths {
            let normalized = normalize_path(path.as_ref());
            if !ImageIOService::is_supported_extension(&normalized) {
                rejected.files.push(normalized);
                continue;
            }
            if !self.files.contains(&normalized) {
                self.files.push(normalized);
            }
        }
        if !rejected.is_empty() {
            tracing::warn!(files = %rejected.names(), "Unsupported files ignored");
        }
        rejected
    }

    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Take the file list for submission, leaving the session empty
    pub fn take_files(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.files)
    }
}

/// Lexically normalize a path: drop `.` and resolve `..` against prior parts
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
