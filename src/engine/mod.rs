pub mod cache;
pub mod index;
pub mod key;
pub mod sequence;

pub use sequence::SequenceKind;

use crate::codec::{pack, unpack};
use crate::config::TernConfig;
use crate::dn::{ATTRIBUTES, BASEINFO, Dn, INDEXLIST};
use crate::entry::{Element, Entry, ModType, Value};
use crate::error::TernError;
use crate::schema::SchemaRegistry;
use crate::store::{HashFile, StoreError, StoreOptions, WriteMode};
use cache::MetaCache;
use key::entry_key;
use std::time::Duration;

/// Attribute naming the owning DNs inside an index bucket entry.
pub const ATTR_IDX: &str = "@IDX";
/// Attribute of `@INDEXLIST` naming the equality-indexed attributes.
pub const ATTR_IDXATTR: &str = "@IDXATTR";
/// `@BASEINFO` change counter attribute.
pub const ATTR_SEQUENCE_NUMBER: &str = "sequenceNumber";
/// `@BASEINFO` last-modification timestamp attribute.
pub const ATTR_MOD_TIMESTAMP: &str = "whenChanged";

/// The backend engine: owns the hashed record file, the schema registry,
/// the metadata cache and the transaction depth. All operations run to
/// completion on the caller's thread.
pub struct Backend {
    store: HashFile,
    schema: SchemaRegistry,
    cache: MetaCache,
    tx_depth: u32,
    read_only: bool,
}

impl Backend {
    pub fn new(config: &TernConfig) -> Result<Self, TernError> {
        let opts = StoreOptions {
            hash_size: config.hash_size,
            read_only: config.read_only,
            no_sync: config.no_sync,
            no_mmap: config.no_mmap,
            create_perms: config.create_perms,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
        };
        let store = HashFile::open(&config.path, opts)
            .map_err(|e| map_store_err(e, &config.path.display().to_string()))?;
        let mut backend = Self {
            store,
            schema: SchemaRegistry::with_wellknown(),
            cache: MetaCache::default(),
            tx_depth: 0,
            read_only: config.read_only,
        };
        backend.refresh_cache()?;
        Ok(backend)
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    // ----- public operations; each write auto-wraps in a transaction -----

    pub fn add(&mut self, msg: &Entry) -> Result<(), TernError> {
        self.with_auto_transaction(|s| s.add_internal(msg))
    }

    pub fn modify(&mut self, msg: &Entry) -> Result<(), TernError> {
        self.with_auto_transaction(|s| {
            s.check_special_dn(msg)?;
            s.refresh_cache()?;
            s.modify_internal(msg)
        })
    }

    pub fn delete(&mut self, dn: &Dn) -> Result<(), TernError> {
        self.with_auto_transaction(|s| {
            s.refresh_cache()?;
            s.delete_internal(dn)
        })
    }

    pub fn rename(&mut self, old: &Dn, new: &Dn) -> Result<(), TernError> {
        self.with_auto_transaction(|s| s.rename_internal(old, new))
    }

    /// Point read of one entry by DN.
    pub fn fetch(&mut self, dn: &Dn) -> Result<Entry, TernError> {
        self.refresh_cache()?;
        self.fetch_entry(dn)
    }

    /// Whether an entry with this DN exists.
    pub fn exists(&mut self, dn: &Dn) -> Result<bool, TernError> {
        match self.fetch(dn) {
            Ok(_) => Ok(true),
            Err(TernError::NoSuchObject(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ----- transaction envelope -----

    pub fn start_transaction(&mut self) -> Result<(), TernError> {
        if self.tx_depth == 0 {
            self.store
                .begin()
                .map_err(|e| map_store_err(e, "transaction"))?;
        }
        self.tx_depth += 1;
        Ok(())
    }

    pub fn end_transaction(&mut self) -> Result<(), TernError> {
        match self.tx_depth {
            0 => Err(TernError::Operations(
                "commit without an active transaction".into(),
            )),
            1 => {
                self.store
                    .commit()
                    .map_err(|e| map_store_err(e, "transaction"))?;
                self.tx_depth = 0;
                Ok(())
            }
            _ => {
                self.tx_depth -= 1;
                Ok(())
            }
        }
    }

    pub fn cancel_transaction(&mut self) -> Result<(), TernError> {
        match self.tx_depth {
            0 => Err(TernError::Operations(
                "cancel without an active transaction".into(),
            )),
            1 => {
                self.tx_depth = 0;
                self.store
                    .cancel()
                    .map_err(|e| map_store_err(e, "transaction"))
            }
            _ => {
                self.tx_depth -= 1;
                Ok(())
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth > 0
    }

    fn with_auto_transaction<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, TernError>,
    ) -> Result<T, TernError> {
        if self.tx_depth > 0 {
            return op(self);
        }
        self.start_transaction()?;
        match op(self) {
            Ok(value) => match self.end_transaction() {
                Ok(()) => Ok(value),
                Err(e) => {
                    if self.tx_depth > 0 {
                        let _ = self.cancel_transaction();
                    }
                    Err(e)
                }
            },
            Err(e) => {
                let _ = self.cancel_transaction();
                Err(e)
            }
        }
    }

    // ----- write path internals -----

    pub(crate) fn fetch_entry(&mut self, dn: &Dn) -> Result<Entry, TernError> {
        let key = entry_key(dn, &self.schema)?;
        let data = self
            .store
            .fetch(key.as_slice())
            .map_err(|e| map_store_err(e, dn.as_str()))?;
        unpack(&data).map_err(|_| TernError::Protocol(format!("corrupt record for {dn}")))
    }

    /// Packs and stores an entry, then maintains the attribute indexes.
    /// If index maintenance fails the freshly written key is removed
    /// before the error propagates.
    pub(crate) fn store_entry(&mut self, entry: &Entry, mode: WriteMode) -> Result<(), TernError> {
        let key = entry_key(&entry.dn, &self.schema)?;
        let data = pack(entry);
        self.store
            .put(key.as_slice(), &data, mode)
            .map_err(|e| map_store_err(e, entry.dn.as_str()))?;
        if let Err(e) = self.index_add(entry) {
            let _ = self.store.delete(key.as_slice());
            return Err(e);
        }
        Ok(())
    }

    /// Removes a record without touching indexes (also used for deleting
    /// index records themselves).
    pub(crate) fn delete_noindex(&mut self, dn: &Dn) -> Result<(), TernError> {
        let key = entry_key(dn, &self.schema)?;
        self.store
            .delete(key.as_slice())
            .map_err(|e| map_store_err(e, dn.as_str()))
    }

    /// `@ATTRIBUTES` messages must carry well-formed
    /// `attr:flags[:syntax]` values in every element.
    fn check_special_dn(&self, msg: &Entry) -> Result<(), TernError> {
        if !msg.dn.check_special(ATTRIBUTES) {
            return Ok(());
        }
        for el in &msg.elements {
            for v in &el.values {
                cache::parse_attributes_tuple(v)?;
            }
        }
        Ok(())
    }

    /// Post-modify hook: schema-affecting special DNs trigger a full
    /// reindex; every DN except `@BASEINFO` bumps the sequence number.
    fn modified(&mut self, dn: &Dn) -> Result<(), TernError> {
        if dn.is_special() && (dn.check_special(INDEXLIST) || dn.check_special(ATTRIBUTES)) {
            self.reindex()?;
        }
        if !(dn.is_special() && dn.check_special(BASEINFO)) {
            self.increase_sequence_number()?;
        }
        Ok(())
    }

    /// Store and index mutations of an add, without the post-modify
    /// hook. Rename composes this with `delete_record` and hooks once.
    fn add_record(&mut self, msg: &Entry) -> Result<(), TernError> {
        self.check_special_dn(msg)?;
        self.refresh_cache()?;
        self.store_entry(msg, WriteMode::Insert)?;
        self.index_one(msg, true)
    }

    /// Store and index mutations of a delete, without the post-modify
    /// hook.
    fn delete_record(&mut self, dn: &Dn) -> Result<(), TernError> {
        // the old record is needed in case any of its attributes was
        // indexed
        let old = self.fetch_entry(dn)?;
        self.delete_noindex(dn)?;
        self.index_one(&old, false)?;
        self.index_del(&old)
    }

    pub(crate) fn add_internal(&mut self, msg: &Entry) -> Result<(), TernError> {
        self.add_record(msg)?;
        self.modified(&msg.dn)
    }

    pub(crate) fn delete_internal(&mut self, dn: &Dn) -> Result<(), TernError> {
        self.delete_record(dn)?;
        self.modified(dn)
    }

    pub(crate) fn modify_internal(&mut self, msg: &Entry) -> Result<(), TernError> {
        let mut cur = self.fetch_entry(&msg.dn)?;

        for el in &msg.elements {
            let mod_type = el.mod_type().ok_or_else(|| {
                TernError::Protocol(format!(
                    "invalid modify flags on {}: 0x{:x}",
                    el.name, el.flags
                ))
            })?;
            let syntax = self.schema.by_name(&el.name).syntax;

            match mod_type {
                ModType::Add => match cur.find_element(&el.name) {
                    None => cur.add_element(Element::new(el.name.clone(), el.values.clone())),
                    Some(i) => {
                        // add values only if absent, checking both the
                        // batch and what is already on disk
                        for (j, v) in el.values.iter().enumerate() {
                            if cur.elements[i].find_value(v, syntax.compare).is_some() {
                                return Err(TernError::AttributeOrValueExists(format!(
                                    "{}: value #{j} already exists",
                                    el.name
                                )));
                            }
                            if el.find_value(v, syntax.compare) != Some(j) {
                                return Err(TernError::AttributeOrValueExists(format!(
                                    "{}: value #{j} provided more than once",
                                    el.name
                                )));
                            }
                        }
                        cur.elements[i].values.extend(el.values.iter().cloned());
                    }
                },
                ModType::Replace => {
                    for (j, v) in el.values.iter().enumerate() {
                        if el.find_value(v, syntax.compare) != Some(j) {
                            return Err(TernError::AttributeOrValueExists(format!(
                                "{}: value #{j} provided more than once",
                                el.name
                            )));
                        }
                    }
                    self.remove_attribute_indexed(&mut cur, &el.name)?;
                    if !el.values.is_empty() {
                        cur.add_element(Element::new(el.name.clone(), el.values.clone()));
                    }
                }
                ModType::Delete => {
                    if el.values.is_empty() {
                        if !self.remove_attribute_indexed(&mut cur, &el.name)? {
                            return Err(TernError::NoSuchAttribute(format!(
                                "no such attribute {} for delete on {}",
                                el.name, msg.dn
                            )));
                        }
                    } else {
                        for (j, v) in el.values.iter().enumerate() {
                            if !self.delete_element_value(&mut cur, &el.name, v)? {
                                return Err(TernError::NoSuchAttribute(format!(
                                    "no matching value of {} for delete on {}",
                                    el.name, msg.dn
                                )));
                            }
                            let dn = cur.dn.clone();
                            self.index_del_value(&dn, el, j)?;
                        }
                    }
                }
            }
        }

        self.store_entry(&cur, WriteMode::Modify)?;
        self.modified(&msg.dn)
    }

    pub(crate) fn rename_internal(&mut self, old: &Dn, new: &Dn) -> Result<(), TernError> {
        self.refresh_cache()?;
        let mut msg = self.fetch_entry(old)?;
        msg.dn = new.clone();

        if old.folded_eq(new, &self.schema)? {
            // case-only rename: the keys collide, so the old record has
            // to go first; the enclosing transaction undoes the delete
            // if the add fails
            self.delete_record(old)?;
            self.add_record(&msg)?;
        } else {
            // add first so an unrelated DN is never clobbered
            self.add_record(&msg)?;
            self.delete_record(old)?;
        }
        // one rename is one externally visible write: hook once
        self.modified(new)
    }

    /// Removes every element named `name` from `cur`, de-indexing each of
    /// its values. Returns whether anything was removed.
    fn remove_attribute_indexed(
        &mut self,
        cur: &mut Entry,
        name: &str,
    ) -> Result<bool, TernError> {
        let mut removed = false;
        while let Some(i) = cur.find_element(name) {
            let el = cur.elements[i].clone();
            let dn = cur.dn.clone();
            for j in 0..el.values.len() {
                self.index_del_value(&dn, &el, j)?;
            }
            cur.elements.remove(i);
            removed = true;
        }
        Ok(removed)
    }

    /// Removes the first value of `name` comparing equal to `val`.
    /// Returns whether a value was removed; the caller updates the index.
    fn delete_element_value(
        &mut self,
        cur: &mut Entry,
        name: &str,
        val: &Value,
    ) -> Result<bool, TernError> {
        let Some(i) = cur.find_element(name) else {
            return Ok(false);
        };
        let syntax = self.schema.by_name(name).syntax;
        let Some(j) = cur.elements[i].find_value(val, syntax.compare) else {
            return Ok(false);
        };
        cur.elements[i].values.remove(j);
        if cur.elements[i].values.is_empty() {
            self.remove_attribute_indexed(cur, name)?;
        }
        Ok(true)
    }
}

/// Maps an underlying store error into the engine's error vocabulary at
/// the call site.
pub(crate) fn map_store_err(err: StoreError, context: &str) -> TernError {
    match err {
        StoreError::NotFound => TernError::NoSuchObject(context.to_string()),
        StoreError::Exists => TernError::EntryAlreadyExists(context.to_string()),
        StoreError::LockTimeout => TernError::TimeLimitExceeded,
        StoreError::Busy => TernError::Busy,
        StoreError::ReadOnly => TernError::InsufficientAccess,
        StoreError::Corrupt(msg) => TernError::Operations(format!("{context}: {msg}")),
        StoreError::Io(msg) => TernError::Protocol(format!("{context}: {msg}")),
        StoreError::Invalid(msg) => TernError::Operations(format!("{context}: {msg}")),
    }
}
