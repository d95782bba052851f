use crate::codec::{pack, unpack};
use crate::dn::{BASEINFO, Dn};
use crate::engine::key::entry_key;
use crate::engine::{ATTR_MOD_TIMESTAMP, ATTR_SEQUENCE_NUMBER, Backend, map_store_err};
use crate::entry::{Element, Entry, Value};
use crate::error::TernError;
use crate::store::{StoreError, WriteMode};
use chrono::{NaiveDateTime, Utc};

/// Which sequence query a request is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// The current change counter, zero when unknown.
    Highest,
    /// The counter the next change will get.
    Next,
    /// The last-modification time as epoch seconds.
    HighestTimestamp,
}

impl Backend {
    /// Answers a sequence query from `@BASEINFO`. A missing entry reads
    /// as zero for every kind.
    pub fn sequence_number(&mut self, kind: SequenceKind) -> Result<u64, TernError> {
        let dn = Dn::new(BASEINFO);
        let key = entry_key(&dn, &self.schema)?;
        let data = match self.store.fetch(key.as_slice()) {
            Ok(data) => data,
            Err(StoreError::NotFound) => return Ok(0),
            Err(e) => return Err(map_store_err(e, BASEINFO)),
        };
        let entry = unpack(&data)
            .map_err(|_| TernError::Protocol(format!("corrupt record for {BASEINFO}")))?;
        Ok(match kind {
            SequenceKind::Highest => entry.find_attr_as_u64(ATTR_SEQUENCE_NUMBER).unwrap_or(0),
            SequenceKind::Next => entry.find_attr_as_u64(ATTR_SEQUENCE_NUMBER).unwrap_or(0) + 1,
            SequenceKind::HighestTimestamp => entry
                .find_attr_as_str(ATTR_MOD_TIMESTAMP)
                .and_then(parse_timestamp)
                .unwrap_or(0),
        })
    }

    /// Bumps `@BASEINFO.sequenceNumber` by one and refreshes
    /// `whenChanged`, inside the transaction of the triggering write.
    pub(crate) fn increase_sequence_number(&mut self) -> Result<(), TernError> {
        let dn = Dn::new(BASEINFO);
        let mut entry = self.fetch_entry(&dn)?;
        let next = entry.find_attr_as_u64(ATTR_SEQUENCE_NUMBER).unwrap_or(0) + 1;
        set_attr(&mut entry, ATTR_SEQUENCE_NUMBER, Value::from(next.to_string()));
        set_attr(&mut entry, ATTR_MOD_TIMESTAMP, Value::from(timestamp_now()));
        let key = entry_key(&dn, &self.schema)?;
        self.store
            .put(key.as_slice(), &pack(&entry), WriteMode::Modify)
            .map_err(|e| map_store_err(e, BASEINFO))?;
        // keep the stamped view current so the next refresh is a no-op
        self.cache.last_seq = next;
        Ok(())
    }
}

fn set_attr(entry: &mut Entry, name: &str, value: Value) {
    match entry.find_element(name) {
        Some(i) => entry.elements[i].values = vec![value],
        None => entry.add_element(Element::new(name, vec![value])),
    }
}

/// Current UTC time in the stored `YYYYmmddHHMMSS.0Z` form.
pub(crate) fn timestamp_now() -> String {
    format!("{}.0Z", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Decodes a stored timestamp back to epoch seconds.
fn parse_timestamp(text: &str) -> Option<u64> {
    let base = text.split('.').next()?;
    let dt = NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S").ok()?;
    u64::try_from(dt.and_utc().timestamp()).ok()
}

#[cfg(test)]
mod tests {
    use super::{parse_timestamp, timestamp_now};

    #[test]
    fn timestamp_round_trips_through_the_stored_form() {
        let now = timestamp_now();
        assert!(now.ends_with(".0Z"));
        assert_eq!(now.len(), 14 + 3);
        let decoded = parse_timestamp(&now).expect("decode");
        assert!(decoded > 1_700_000_000);
    }

    #[test]
    fn known_timestamp_decodes() {
        assert_eq!(parse_timestamp("19700101000010.0Z"), Some(10));
        assert_eq!(parse_timestamp("not-a-time"), None);
    }
}
