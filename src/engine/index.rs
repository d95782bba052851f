use crate::codec::unpack;
use crate::dn::{Dn, IDXONE_PREFIX, INDEX_PREFIX};
use crate::engine::key::{KEY_PREFIX, entry_key};
use crate::engine::{ATTR_IDX, Backend, map_store_err};
use crate::entry::{Element, Entry, Value};
use crate::error::TernError;
use crate::store::{StoreError, WriteMode};
use tracing::{debug, warn};

impl Backend {
    pub(crate) fn is_indexed(&self, attr: &str) -> bool {
        self.cache
            .indexed
            .iter()
            .any(|a| a.eq_ignore_ascii_case(attr))
    }

    /// Appends the entry's DN to the bucket of every indexed
    /// (attribute, value) pair it carries. Special DNs are never indexed.
    pub(crate) fn index_add(&mut self, entry: &Entry) -> Result<(), TernError> {
        if entry.dn.is_special() || self.cache.indexed.is_empty() {
            return Ok(());
        }
        for el in &entry.elements {
            if !self.is_indexed(&el.name) {
                continue;
            }
            for v in &el.values {
                let bucket = self.index_bucket_dn(&el.name, v)?;
                self.index_bucket_add(&bucket, entry.dn.as_str())?;
            }
        }
        Ok(())
    }

    /// Inverse of `index_add` across every indexed pair of the entry.
    pub(crate) fn index_del(&mut self, entry: &Entry) -> Result<(), TernError> {
        if entry.dn.is_special() || self.cache.indexed.is_empty() {
            return Ok(());
        }
        for el in &entry.elements {
            if !self.is_indexed(&el.name) {
                continue;
            }
            for v in &el.values {
                let bucket = self.index_bucket_dn(&el.name, v)?;
                self.index_bucket_del(&bucket, entry.dn.as_str())?;
            }
        }
        Ok(())
    }

    /// Removes the single (attribute, values[idx]) linkage for `dn`.
    pub(crate) fn index_del_value(
        &mut self,
        dn: &Dn,
        el: &Element,
        idx: usize,
    ) -> Result<(), TernError> {
        if dn.is_special() || !self.is_indexed(&el.name) {
            return Ok(());
        }
        let bucket = self.index_bucket_dn(&el.name, &el.values[idx])?;
        self.index_bucket_del(&bucket, dn.as_str())
    }

    /// Maintains the one-level (parent to children) slot for the entry.
    pub(crate) fn index_one(&mut self, entry: &Entry, add: bool) -> Result<(), TernError> {
        if entry.dn.is_special() {
            return Ok(());
        }
        let Some(parent) = entry.dn.parent() else {
            return Ok(());
        };
        let folded = parent.casefold(&self.schema)?;
        let bucket = Dn::new(format!("{IDXONE_PREFIX}{folded}"));
        if add {
            self.index_bucket_add(&bucket, entry.dn.as_str())
        } else {
            self.index_bucket_del(&bucket, entry.dn.as_str())
        }
    }

    /// Drops every index record and rebuilds all of them from the
    /// regular entries. Runs after `@ATTRIBUTES` or `@INDEXLIST` change.
    pub(crate) fn reindex(&mut self) -> Result<(), TernError> {
        debug!("rebuilding attribute and one-level indexes");
        self.force_cache_reload();
        self.refresh_cache()?;

        let snapshot = self.store.snapshot();
        for (key, _) in snapshot.iter() {
            if is_index_key(key) {
                self.store
                    .delete(key)
                    .map_err(|e| map_store_err(e, "index record"))?;
            }
        }
        for (key, data) in snapshot.iter() {
            if is_index_key(key) || !key.starts_with(KEY_PREFIX) {
                continue;
            }
            let entry = unpack(data)
                .map_err(|_| TernError::Protocol("corrupt record during reindex".into()))?;
            if entry.dn.is_special() {
                continue;
            }
            self.index_one(&entry, true)?;
            self.index_add(&entry)?;
        }
        Ok(())
    }

    /// The bucket DN for one indexed (attribute, value) pair: attribute
    /// name folded, value canonicalised by the attribute's syntax.
    pub(crate) fn index_bucket_dn(&self, attr: &str, val: &Value) -> Result<Dn, TernError> {
        let syntax = self.schema.by_name(attr).syntax;
        let canon = syntax.canonicalise(val)?;
        Ok(Dn::new(format!(
            "{INDEX_PREFIX}{}:{}",
            attr.to_ascii_uppercase(),
            escape_index_value(canon.as_bytes())
        )))
    }

    fn index_bucket_add(&mut self, bucket: &Dn, dn_text: &str) -> Result<(), TernError> {
        let key = entry_key(bucket, &self.schema)?;
        let mut entry = match self.store.fetch(key.as_slice()) {
            Ok(data) => unpack(&data)
                .map_err(|_| TernError::Protocol(format!("corrupt record for {bucket}")))?,
            Err(StoreError::NotFound) => Entry::new(bucket.clone()),
            Err(e) => return Err(map_store_err(e, bucket.as_str())),
        };
        let i = match entry.find_element(ATTR_IDX) {
            Some(i) => i,
            None => {
                entry.add_element(Element::new(ATTR_IDX, Vec::new()));
                entry.elements.len() - 1
            }
        };
        // a DN must appear at most once per bucket
        if entry.elements[i]
            .values
            .iter()
            .any(|v| v.as_bytes() == dn_text.as_bytes())
        {
            return Ok(());
        }
        entry.elements[i].values.push(Value::from(dn_text));
        self.store_entry(&entry, WriteMode::Replace)
    }

    /// Removes `dn_text` from the bucket, deleting the bucket record
    /// outright when its list empties. Removing an absent DN or bucket
    /// is tolerated.
    fn index_bucket_del(&mut self, bucket: &Dn, dn_text: &str) -> Result<(), TernError> {
        let key = entry_key(bucket, &self.schema)?;
        let mut entry = match self.store.fetch(key.as_slice()) {
            Ok(data) => unpack(&data)
                .map_err(|_| TernError::Protocol(format!("corrupt record for {bucket}")))?,
            Err(StoreError::NotFound) => {
                warn!(bucket = %bucket, "index bucket already absent");
                return Ok(());
            }
            Err(e) => return Err(map_store_err(e, bucket.as_str())),
        };
        let Some(i) = entry.find_element(ATTR_IDX) else {
            return self.delete_noindex(bucket);
        };
        let Some(j) = entry.elements[i]
            .values
            .iter()
            .position(|v| v.as_bytes() == dn_text.as_bytes())
        else {
            warn!(bucket = %bucket, dn = dn_text, "DN not listed in index bucket");
            return Ok(());
        };
        entry.elements[i].values.remove(j);
        if entry.elements[i].values.is_empty() {
            self.delete_noindex(bucket)
        } else {
            self.store_entry(&entry, WriteMode::Replace)
        }
    }
}

fn is_index_key(key: &[u8]) -> bool {
    fn after_prefix(key: &[u8]) -> &[u8] {
        &key[KEY_PREFIX.len()..]
    }
    key.len() > KEY_PREFIX.len()
        && key.starts_with(KEY_PREFIX)
        && (after_prefix(key).starts_with(INDEX_PREFIX.as_bytes())
            || after_prefix(key).starts_with(IDXONE_PREFIX.as_bytes()))
}

/// Percent-escapes canonical value bytes outside printable ASCII so the
/// bucket DN text stays deterministic and injective.
fn escape_index_value(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..=0x7e).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
