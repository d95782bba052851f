use crate::error::TernError;
use std::path::{Path, PathBuf};

pub const DEFAULT_HASH_SIZE: u32 = 10_000;
pub const DEFAULT_CREATE_PERMS: u32 = 0o644;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Runtime configuration for a terndb handle.
#[derive(Debug, Clone)]
pub struct TernConfig {
    pub path: PathBuf,
    pub hash_size: u32,
    pub read_only: bool,
    pub no_sync: bool,
    pub no_mmap: bool,
    pub create_perms: u32,
    pub lock_timeout_ms: u64,
}

impl TernConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash_size: DEFAULT_HASH_SIZE,
            read_only: false,
            no_sync: false,
            no_mmap: false,
            create_perms: DEFAULT_CREATE_PERMS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    /// Parses a connection URL of the form `tdb://<path>` or a bare path.
    /// Any other scheme is rejected.
    pub fn from_url(url: &str) -> Result<Self, TernError> {
        let path = match url.split_once("://") {
            Some(("tdb", rest)) if !rest.is_empty() => Path::new(rest),
            Some((scheme, _)) => {
                return Err(TernError::Operations(format!(
                    "invalid connection URL scheme '{scheme}'"
                )));
            }
            None => Path::new(url),
        };
        if path.as_os_str().is_empty() {
            return Err(TernError::Operations("empty database path".into()));
        }
        Ok(Self::new(path))
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn no_sync(mut self, no_sync: bool) -> Self {
        self.no_sync = no_sync;
        self
    }

    pub fn no_mmap(mut self, no_mmap: bool) -> Self {
        self.no_mmap = no_mmap;
        self
    }

    pub fn create_perms(mut self, perms: u32) -> Self {
        self.create_perms = perms;
        self
    }
}
