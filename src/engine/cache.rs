use crate::codec::{pack, unpack};
use crate::dn::{ATTRIBUTES, BASEINFO, Dn, INDEXLIST};
use crate::engine::key::entry_key;
use crate::engine::sequence::timestamp_now;
use crate::engine::{
    ATTR_IDXATTR, ATTR_MOD_TIMESTAMP, ATTR_SEQUENCE_NUMBER, Backend, map_store_err,
};
use crate::entry::{Entry, Value};
use crate::error::TernError;
use crate::schema::ATTR_FLAG_ALLOCATED;
use crate::schema::syntax::{SYNTAX_OCTET_STRING, syntax_by_name};
use crate::store::{StoreError, WriteMode};
use tracing::{debug, warn};

/// In-memory view of the metadata entries, stamped with the sequence
/// number it was loaded at. A matching on-disk sequence means the view
/// can be reused without touching the store.
#[derive(Debug, Default)]
pub(crate) struct MetaCache {
    pub(crate) primed: bool,
    pub(crate) last_seq: u64,
    /// Lower-cased names of the equality-indexed attributes.
    pub(crate) indexed: Vec<String>,
}

/// One parsed `@ATTRIBUTES` value: `attr:flags[:syntax]`.
#[derive(Debug, PartialEq, Eq)]
pub struct AttrTuple {
    pub attr: String,
    pub flags: u32,
    pub syntax: String,
}

pub fn parse_attributes_tuple(value: &Value) -> Result<AttrTuple, TernError> {
    let text = value.as_str().ok_or_else(|| {
        TernError::InvalidAttributeSyntax("attribute declaration is not text".into())
    })?;
    let mut parts = text.splitn(3, ':');
    let attr = parts.next().unwrap_or_default();
    if attr.is_empty() {
        return Err(TernError::InvalidAttributeSyntax(format!(
            "missing attribute name in '{text}'"
        )));
    }
    let flags_text = parts.next().ok_or_else(|| {
        TernError::InvalidAttributeSyntax(format!("missing flag mask in '{text}'"))
    })?;
    let flags: u32 = flags_text.parse().map_err(|_| {
        TernError::InvalidAttributeSyntax(format!("bad flag mask '{flags_text}' in '{text}'"))
    })?;
    let syntax = parts.next().unwrap_or(SYNTAX_OCTET_STRING);
    if syntax_by_name(syntax).is_none() {
        return Err(TernError::InvalidAttributeSyntax(format!(
            "unknown syntax '{syntax}' in '{text}'"
        )));
    }
    Ok(AttrTuple {
        attr: attr.to_string(),
        flags,
        syntax: syntax.to_string(),
    })
}

impl Backend {
    /// Refreshes the metadata view if the on-disk sequence moved since
    /// the last load. Runs before every write and sensitive read.
    pub(crate) fn refresh_cache(&mut self) -> Result<(), TernError> {
        let seq = self.load_or_init_baseinfo()?;
        if self.cache.primed && seq == self.cache.last_seq {
            return Ok(());
        }
        debug!(seq, "reloading metadata cache");
        self.load_attributes()?;
        self.load_indexlist()?;
        self.cache.primed = true;
        self.cache.last_seq = seq;
        Ok(())
    }

    /// Forces the next refresh to reload even at an unchanged sequence.
    pub(crate) fn force_cache_reload(&mut self) {
        self.cache.primed = false;
    }

    /// Reads `@BASEINFO`, creating it on first contact, and returns the
    /// stored sequence number.
    fn load_or_init_baseinfo(&mut self) -> Result<u64, TernError> {
        let dn = Dn::new(BASEINFO);
        let key = entry_key(&dn, &self.schema)?;
        match self.store.fetch(key.as_slice()) {
            Ok(data) => {
                let entry = unpack(&data)
                    .map_err(|_| TernError::Protocol(format!("corrupt record for {BASEINFO}")))?;
                Ok(entry.find_attr_as_u64(ATTR_SEQUENCE_NUMBER).unwrap_or(0))
            }
            Err(StoreError::NotFound) => {
                if self.read_only {
                    return Ok(0);
                }
                debug!("creating initial {BASEINFO}");
                let entry = Entry::new(dn)
                    .with_element(ATTR_SEQUENCE_NUMBER, vec![Value::from("0")])
                    .with_element(ATTR_MOD_TIMESTAMP, vec![Value::from(timestamp_now())]);
                self.store
                    .put(key.as_slice(), &pack(&entry), WriteMode::Insert)
                    .map_err(|e| map_store_err(e, BASEINFO))?;
                Ok(0)
            }
            Err(e) => Err(map_store_err(e, BASEINFO)),
        }
    }

    /// Drops runtime-registered attributes and re-registers the set
    /// declared by `@ATTRIBUTES`.
    fn load_attributes(&mut self) -> Result<(), TernError> {
        self.schema.unload_registered();
        let dn = Dn::new(ATTRIBUTES);
        let key = entry_key(&dn, &self.schema)?;
        let data = match self.store.fetch(key.as_slice()) {
            Ok(data) => data,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(map_store_err(e, ATTRIBUTES)),
        };
        let entry = unpack(&data)
            .map_err(|_| TernError::Protocol(format!("corrupt record for {ATTRIBUTES}")))?;
        for el in &entry.elements {
            for v in &el.values {
                let tuple = parse_attributes_tuple(v)?;
                self.schema.register_named(
                    &tuple.attr,
                    tuple.flags | ATTR_FLAG_ALLOCATED,
                    &tuple.syntax,
                )?;
            }
        }
        Ok(())
    }

    /// Rebuilds the indexed-attribute list from `@INDEXLIST`.
    fn load_indexlist(&mut self) -> Result<(), TernError> {
        self.cache.indexed.clear();
        let dn = Dn::new(INDEXLIST);
        let key = entry_key(&dn, &self.schema)?;
        let data = match self.store.fetch(key.as_slice()) {
            Ok(data) => data,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(map_store_err(e, INDEXLIST)),
        };
        let entry = unpack(&data)
            .map_err(|_| TernError::Protocol(format!("corrupt record for {INDEXLIST}")))?;
        if let Some(el) = entry.element(ATTR_IDXATTR) {
            for v in &el.values {
                match v.as_str() {
                    Some(name) => self.cache.indexed.push(name.to_ascii_lowercase()),
                    None => warn!("ignoring non-text attribute name in {INDEXLIST}"),
                }
            }
        }
        Ok(())
    }
}
