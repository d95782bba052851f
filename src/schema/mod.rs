pub mod syntax;

use crate::error::TernError;
use syntax::{
    OCTET_STRING, SYNTAX_DIRECTORY_STRING, SYNTAX_DN, SYNTAX_OBJECT_CLASS, Syntax, syntax_by_name,
};

/// The attribute was registered at runtime (from `@ATTRIBUTES`) and is
/// dropped again when the metadata is reloaded.
pub const ATTR_FLAG_ALLOCATED: u32 = 0x1;
/// The attribute may not be overwritten or removed.
pub const ATTR_FLAG_FIXED: u32 = 0x2;

#[derive(Debug)]
pub struct SchemaAttribute {
    pub name: String,
    pub flags: u32,
    pub syntax: &'static Syntax,
}

/// Attribute descriptors sorted by case-insensitive name. A leading `*`
/// entry, if present, acts as the default for unmatched lookups and is
/// excluded from the binary-search range.
#[derive(Debug)]
pub struct SchemaRegistry {
    attributes: Vec<SchemaAttribute>,
    default: SchemaAttribute,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            attributes: Vec::new(),
            default: SchemaAttribute {
                name: String::new(),
                flags: 0,
                syntax: &OCTET_STRING,
            },
        }
    }

    /// A registry with the well-known attribute set registered.
    pub fn with_wellknown() -> Self {
        let mut reg = Self::new();
        let wellknown: [(&str, &str); 6] = [
            ("dn", SYNTAX_DN),
            ("distinguishedName", SYNTAX_DN),
            ("cn", SYNTAX_DIRECTORY_STRING),
            ("dc", SYNTAX_DIRECTORY_STRING),
            ("ou", SYNTAX_DIRECTORY_STRING),
            ("objectClass", SYNTAX_OBJECT_CLASS),
        ];
        for (attr, syntax) in wellknown {
            // built-in syntax names always resolve
            reg.register_named(attr, 0, syntax)
                .expect("well-known syntax");
        }
        reg
    }

    /// Registers an attribute. An existing FIXED descriptor silently wins;
    /// any other existing descriptor is replaced in place.
    pub fn register(&mut self, name: &str, flags: u32, syntax: &'static Syntax) {
        match self.position(name) {
            Ok(i) => {
                let existing = &mut self.attributes[i];
                if existing.flags & ATTR_FLAG_FIXED != 0 {
                    return;
                }
                existing.name = name.to_string();
                existing.flags = flags;
                existing.syntax = syntax;
            }
            Err(i) => self.attributes.insert(
                i,
                SchemaAttribute {
                    name: name.to_string(),
                    flags,
                    syntax,
                },
            ),
        }
    }

    /// Registers an attribute with a syntax looked up by name.
    pub fn register_named(&mut self, name: &str, flags: u32, syntax: &str) -> Result<(), TernError> {
        let s = syntax_by_name(syntax).ok_or_else(|| {
            TernError::Operations(format!("unknown attribute syntax '{syntax}'"))
        })?;
        self.register(name, flags, s);
        Ok(())
    }

    /// Descriptor for an attribute, or the octet-string default.
    pub fn by_name(&self, name: &str) -> &SchemaAttribute {
        let (default, base) = match self.attributes.first() {
            Some(first) if first.name == "*" => (first, 1),
            _ => (&self.default, 0),
        };
        match self.attributes[base..].binary_search_by(|a| attr_key(&a.name).cmp(&attr_key(name))) {
            Ok(i) => &self.attributes[base + i],
            Err(_) => default,
        }
    }

    /// Removes an attribute descriptor. FIXED descriptors are never
    /// removed; absent names are ignored.
    pub fn remove(&mut self, name: &str) {
        if let Ok(i) = self.position(name) {
            if self.attributes[i].flags & ATTR_FLAG_FIXED != 0 {
                return;
            }
            self.attributes.remove(i);
        }
    }

    /// Drops every descriptor registered at runtime (ALLOCATED), keeping
    /// the compile-time set. Used when `@ATTRIBUTES` is reloaded.
    pub fn unload_registered(&mut self) {
        self.attributes
            .retain(|a| a.flags & ATTR_FLAG_ALLOCATED == 0);
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.attributes
            .binary_search_by(|a| attr_key(&a.name).cmp(&attr_key(name)))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn attr_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{ATTR_FLAG_ALLOCATED, ATTR_FLAG_FIXED, SchemaRegistry};
    use crate::schema::syntax::{BOOLEAN, DIRECTORY_STRING, INTEGER, OCTET_STRING};

    #[test]
    fn lookup_is_independent_of_registration_order() {
        let names = ["cn", "ou", "dc", "uid", "mail", "telephoneNumber"];
        let mut forward = SchemaRegistry::new();
        for n in names {
            forward.register(n, 0, &DIRECTORY_STRING);
        }
        let mut reverse = SchemaRegistry::new();
        for n in names.iter().rev() {
            reverse.register(n, 0, &DIRECTORY_STRING);
        }
        for n in names {
            assert_eq!(forward.by_name(n).name, reverse.by_name(n).name);
            assert_eq!(forward.by_name(n).syntax.name, "DirectoryString");
        }
        assert_eq!(forward.len(), reverse.len());
    }

    #[test]
    fn missing_attribute_falls_back_to_octet_default() {
        let reg = SchemaRegistry::with_wellknown();
        let a = reg.by_name("unregistered");
        assert_eq!(a.syntax.name, "OctetString");
        assert_eq!(a.flags, 0);
    }

    #[test]
    fn wildcard_entry_is_the_default_and_skips_binary_search() {
        let mut reg = SchemaRegistry::new();
        reg.register("*", 0, &INTEGER);
        reg.register("cn", 0, &DIRECTORY_STRING);
        assert_eq!(reg.by_name("anything").syntax.name, "Integer");
        assert_eq!(reg.by_name("cn").syntax.name, "DirectoryString");
    }

    #[test]
    fn fixed_attributes_survive_register_and_remove() {
        let mut reg = SchemaRegistry::new();
        reg.register("cn", ATTR_FLAG_FIXED, &DIRECTORY_STRING);
        reg.register("cn", 0, &OCTET_STRING);
        assert_eq!(reg.by_name("cn").syntax.name, "DirectoryString");
        reg.remove("cn");
        assert_eq!(reg.by_name("cn").syntax.name, "DirectoryString");
    }

    #[test]
    fn register_replaces_in_place_and_unload_drops_allocated() {
        let mut reg = SchemaRegistry::with_wellknown();
        let before = reg.len();
        reg.register("cn", ATTR_FLAG_ALLOCATED, &BOOLEAN);
        assert_eq!(reg.len(), before);
        assert_eq!(reg.by_name("CN").syntax.name, "Boolean");
        reg.register("newAttr", ATTR_FLAG_ALLOCATED, &INTEGER);
        assert_eq!(reg.len(), before + 1);
        reg.unload_registered();
        assert_eq!(reg.by_name("newAttr").syntax.name, "OctetString");
        assert_eq!(reg.by_name("cn").syntax.name, "OctetString");
    }
}
