use crate::dn::Dn;
use crate::error::TernError;
use crate::schema::SchemaRegistry;
use smallvec::SmallVec;

/// Key prefix shared by every record in the store.
pub const KEY_PREFIX: &[u8] = b"DN=";

/// A store key: `DN=` + casefolded DN + NUL. Most keys fit inline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey {
    bytes: SmallVec<[u8; 64]>,
}

impl StoreKey {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

/// Builds the store key for an entry DN. Normal DNs are casefolded;
/// special `@` DNs are emitted verbatim.
pub fn entry_key(dn: &Dn, schema: &SchemaRegistry) -> Result<StoreKey, TernError> {
    let folded;
    let text = if dn.is_special() {
        dn.as_str()
    } else {
        folded = dn.casefold(schema)?;
        &folded
    };
    let mut bytes = SmallVec::with_capacity(KEY_PREFIX.len() + text.len() + 1);
    bytes.extend_from_slice(KEY_PREFIX);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    Ok(StoreKey { bytes })
}
