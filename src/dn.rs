use crate::error::TernError;
use crate::schema::SchemaRegistry;
use std::fmt;

pub const BASEINFO: &str = "@BASEINFO";
pub const ATTRIBUTES: &str = "@ATTRIBUTES";
pub const INDEXLIST: &str = "@INDEXLIST";
pub const INDEX_PREFIX: &str = "@INDEX:";
pub const IDXONE_PREFIX: &str = "@IDXONE:";

/// A linearised distinguished name.
///
/// Normal DNs (`cn=a,dc=x`) identify user entries and are compared in
/// their casefolded form. DNs starting with `@` are reserved for
/// metadata and index records and are never folded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dn {
    text: String,
}

impl Dn {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_special(&self) -> bool {
        self.text.starts_with('@')
    }

    pub fn check_special(&self, name: &str) -> bool {
        self.text == name
    }

    /// Splits the DN into components at unescaped commas. A `\,` inside
    /// an attribute value does not separate components.
    pub fn components(&self) -> Vec<&str> {
        split_unescaped(&self.text, ',')
    }

    /// The parent DN, or `None` for single-component and special DNs.
    pub fn parent(&self) -> Option<Dn> {
        if self.is_special() {
            return None;
        }
        let comps = self.components();
        if comps.len() < 2 {
            return None;
        }
        let head = comps[0];
        let rest = self.text[head.len() + 1..].trim_start();
        Some(Dn::new(rest))
    }

    /// Canonical casefolded form. Attribute names are uppercased and each
    /// value is folded through its attribute's syntax canonicalisation.
    /// Special DNs are returned verbatim.
    pub fn casefold(&self, schema: &SchemaRegistry) -> Result<String, TernError> {
        if self.is_special() {
            return Ok(self.text.clone());
        }
        let mut out = String::with_capacity(self.text.len());
        for (i, comp) in self.components().iter().enumerate() {
            let comp = comp.trim_start();
            let (attr, value) = comp.split_once('=').ok_or_else(|| {
                TernError::Operations(format!("cannot casefold malformed DN '{}'", self.text))
            })?;
            if attr.is_empty() {
                return Err(TernError::Operations(format!(
                    "cannot casefold malformed DN '{}'",
                    self.text
                )));
            }
            let folded = schema
                .by_name(attr)
                .syntax
                .canonicalise_str(value)
                .map_err(|_| {
                    TernError::Operations(format!("cannot casefold DN '{}'", self.text))
                })?;
            if i > 0 {
                out.push(',');
            }
            out.push_str(&attr.to_ascii_uppercase());
            out.push('=');
            out.push_str(&folded);
        }
        Ok(out)
    }

    /// Whether two DNs identify the same entry (casefold equality).
    pub fn folded_eq(&self, other: &Dn, schema: &SchemaRegistry) -> Result<bool, TernError> {
        if self.is_special() || other.is_special() {
            return Ok(self.text == other.text);
        }
        Ok(self.casefold(schema)? == other.casefold(schema)?)
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Dn {
    fn from(text: &str) -> Self {
        Dn::new(text)
    }
}

fn split_unescaped(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&text[start..i]);
            start = i + sep.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}
