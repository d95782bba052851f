//! terndb: an embedded hierarchical directory database.
//!
//! Entries are LDAP-style messages (a DN plus named multi-valued
//! attributes) persisted in a single hashed record file with
//! transactional commit. Attribute semantics are schema driven and
//! attributes named in `@INDEXLIST` get equality indexes maintained by
//! the write path.

pub mod codec;
pub mod config;
pub mod dn;
pub mod engine;
pub mod entry;
pub mod error;
pub mod request;
pub mod schema;
pub mod store;

pub use config::TernConfig;
pub use dn::Dn;
pub use engine::SequenceKind;
pub use entry::{Element, Entry, MOD_ADD, MOD_DELETE, MOD_REPLACE, Value};
pub use error::{TernError, TernErrorCode};
pub use request::{Control, HandleState, Operation, Reply, Request, RequestHandle};

use engine::Backend;
use parking_lot::Mutex;
use tracing::info;

/// A database handle. Operations are synchronous and serialised; the
/// handle may be shared across threads.
pub struct TernDb {
    inner: Mutex<Backend>,
}

impl TernDb {
    pub fn open(config: TernConfig) -> Result<Self, TernError> {
        info!(
            path = %config.path.display(),
            hash_size = config.hash_size,
            read_only = config.read_only,
            no_sync = config.no_sync,
            no_mmap = config.no_mmap,
            create_perms = %format_args!("0o{:o}", config.create_perms),
            "opening terndb store"
        );
        Ok(Self {
            inner: Mutex::new(Backend::new(&config)?),
        })
    }

    /// Opens from a `tdb://<path>` URL or a bare path.
    pub fn connect(url: &str) -> Result<Self, TernError> {
        Self::open(TernConfig::from_url(url)?)
    }

    pub fn add(&self, msg: &Entry) -> Result<(), TernError> {
        self.inner.lock().add(msg)
    }

    pub fn modify(&self, msg: &Entry) -> Result<(), TernError> {
        self.inner.lock().modify(msg)
    }

    pub fn delete(&self, dn: &Dn) -> Result<(), TernError> {
        self.inner.lock().delete(dn)
    }

    pub fn rename(&self, old: &Dn, new: &Dn) -> Result<(), TernError> {
        self.inner.lock().rename(old, new)
    }

    /// Point read of one entry by DN.
    pub fn fetch(&self, dn: &Dn) -> Result<Entry, TernError> {
        self.inner.lock().fetch(dn)
    }

    pub fn exists(&self, dn: &Dn) -> Result<bool, TernError> {
        self.inner.lock().exists(dn)
    }

    pub fn sequence_number(&self, kind: SequenceKind) -> Result<u64, TernError> {
        self.inner.lock().sequence_number(kind)
    }

    pub fn start_transaction(&self) -> Result<(), TernError> {
        self.inner.lock().start_transaction()
    }

    pub fn end_transaction(&self) -> Result<(), TernError> {
        self.inner.lock().end_transaction()
    }

    pub fn cancel_transaction(&self) -> Result<(), TernError> {
        self.inner.lock().cancel_transaction()
    }

    /// Dispatches a request record through the adapter.
    pub fn request(&self, req: Request) -> RequestHandle {
        request::dispatch(&mut self.inner.lock(), req, None)
    }

    /// As `request`, invoking `callback` exactly once with the outcome.
    pub fn request_with_callback(
        &self,
        req: Request,
        callback: request::Continuation<'_>,
    ) -> RequestHandle {
        request::dispatch(&mut self.inner.lock(), req, Some(callback))
    }
}
