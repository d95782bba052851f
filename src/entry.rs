use crate::dn::Dn;
use std::cmp::Ordering;
use std::fmt;

/// Modify disposition carried in the low bits of an element's flags.
pub const MOD_MASK: u32 = 0x3;
pub const MOD_ADD: u32 = 0x1;
pub const MOD_REPLACE: u32 = 0x2;
pub const MOD_DELETE: u32 = 0x3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModType {
    Add,
    Replace,
    Delete,
}

/// An opaque attribute value: a byte string with explicit length.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

/// One attribute within an entry: name, flags, ordered values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub flags: u32,
    pub values: Vec<Value>,
}

impl Element {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            flags: 0,
            values,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn mod_type(&self) -> Option<ModType> {
        match self.flags & MOD_MASK {
            MOD_ADD => Some(ModType::Add),
            MOD_REPLACE => Some(ModType::Replace),
            MOD_DELETE => Some(ModType::Delete),
            _ => None,
        }
    }

    /// Index of the first value comparing equal to `val` under `cmp`.
    pub fn find_value(&self, val: &Value, cmp: fn(&Value, &Value) -> Ordering) -> Option<usize> {
        self.values.iter().position(|v| cmp(v, val) == Ordering::Equal)
    }
}

/// An entry: a DN plus an ordered sequence of elements. Attribute names
/// are unique case-insensitively within one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: Dn,
    pub elements: Vec<Element>,
}

impl Entry {
    pub fn new(dn: impl Into<Dn>) -> Self {
        Self {
            dn: dn.into(),
            elements: Vec::new(),
        }
    }

    pub fn with_element(mut self, name: &str, values: Vec<Value>) -> Self {
        self.elements.push(Element::new(name, values));
        self
    }

    pub fn find_element(&self, name: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|el| el.name.eq_ignore_ascii_case(name))
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.find_element(name).map(|i| &self.elements[i])
    }

    pub fn add_element(&mut self, el: Element) {
        self.elements.push(el);
    }

    /// Removes every element with the given attribute name. Returns
    /// whether any was present.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let before = self.elements.len();
        self.elements.retain(|el| !el.name.eq_ignore_ascii_case(name));
        self.elements.len() != before
    }

    /// First value of the named attribute as text.
    pub fn find_attr_as_str(&self, name: &str) -> Option<&str> {
        self.element(name)?.values.first()?.as_str()
    }

    /// First value of the named attribute parsed as a decimal u64.
    pub fn find_attr_as_u64(&self, name: &str) -> Option<u64> {
        self.find_attr_as_str(name)?.trim().parse().ok()
    }
}
