use crate::dn::Dn;
use crate::entry::{Element, Entry, Value};
use thiserror::Error;

/// Format word stamped on every packed record.
const RECORD_FORMAT_V1: u32 = 0x5452_4E01;

/// Upper bound on any single length field; rejects absurd counts before
/// allocation.
const MAX_FIELD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated record")]
    Truncated,
    #[error("corrupt record")]
    Corrupt,
}

/// Packs an entry into its self-describing binary record form.
///
/// Layout: format word, DN (length + bytes), element count, then per
/// element the name (length + bytes), value count, and each value
/// (length + bytes). Element flags are not persisted. Packing the same
/// entry always yields the same bytes.
pub fn pack(entry: &Entry) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + entry.dn.as_str().len());
    out.extend_from_slice(&RECORD_FORMAT_V1.to_be_bytes());
    put_bytes(&mut out, entry.dn.as_str().as_bytes());
    out.extend_from_slice(&(entry.elements.len() as u32).to_be_bytes());
    for el in &entry.elements {
        put_bytes(&mut out, el.name.as_bytes());
        out.extend_from_slice(&(el.values.len() as u32).to_be_bytes());
        for v in &el.values {
            put_bytes(&mut out, v.as_bytes());
        }
    }
    out
}

/// Unpacks a binary record back into an entry. Flags come back as 0.
pub fn unpack(data: &[u8]) -> Result<Entry, CodecError> {
    let mut r = Reader { buf: data, pos: 0 };
    let format = r.u32()?;
    if format != RECORD_FORMAT_V1 {
        return Err(CodecError::Corrupt);
    }
    let dn = String::from_utf8(r.bytes()?.to_vec()).map_err(|_| CodecError::Corrupt)?;
    let num_elements = r.count()?;
    let mut elements = Vec::with_capacity(num_elements);
    for _ in 0..num_elements {
        let name = String::from_utf8(r.bytes()?.to_vec()).map_err(|_| CodecError::Corrupt)?;
        let num_values = r.count()?;
        let mut values = Vec::with_capacity(num_values);
        for _ in 0..num_values {
            values.push(Value::new(r.bytes()?.to_vec()));
        }
        elements.push(Element::new(name, values));
    }
    if r.pos != r.buf.len() {
        return Err(CodecError::Corrupt);
    }
    Ok(Entry {
        dn: Dn::new(dn),
        elements,
    })
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u32(&mut self) -> Result<u32, CodecError> {
        let end = self.pos.checked_add(4).ok_or(CodecError::Corrupt)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let word = u32::from_be_bytes(
            self.buf[self.pos..end]
                .try_into()
                .map_err(|_| CodecError::Corrupt)?,
        );
        self.pos = end;
        Ok(word)
    }

    fn bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        if len > MAX_FIELD_BYTES {
            return Err(CodecError::Corrupt);
        }
        let end = self.pos.checked_add(len).ok_or(CodecError::Corrupt)?;
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// A count field; bounded by the bytes remaining so a corrupt count
    /// cannot reserve unbounded memory.
    fn count(&mut self) -> Result<usize, CodecError> {
        let n = self.u32()? as usize;
        if n > self.buf.len().saturating_sub(self.pos) {
            return Err(CodecError::Corrupt);
        }
        Ok(n)
    }
}
