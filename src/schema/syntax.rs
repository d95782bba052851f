use crate::entry::Value;
use crate::error::TernError;
use std::cmp::Ordering;

pub const SYNTAX_OCTET_STRING: &str = "OctetString";
pub const SYNTAX_DIRECTORY_STRING: &str = "DirectoryString";
pub const SYNTAX_DN: &str = "DN";
pub const SYNTAX_OBJECT_CLASS: &str = "ObjectClass";
pub const SYNTAX_INTEGER: &str = "Integer";
pub const SYNTAX_BOOLEAN: &str = "Boolean";

pub type TextFn = fn(&Value) -> Result<Value, TernError>;
pub type CompareFn = fn(&Value, &Value) -> Ordering;

/// Per-attribute value semantics: textual read/write, canonicalisation,
/// and a total-order comparison. Built-in syntaxes are compile-time
/// constants; the registry hands out references to them.
pub struct Syntax {
    pub name: &'static str,
    pub read: TextFn,
    pub write: TextFn,
    pub canonicalise: TextFn,
    pub compare: CompareFn,
}

impl Syntax {
    pub fn canonicalise(&self, val: &Value) -> Result<Value, TernError> {
        (self.canonicalise)(val)
    }

    pub fn canonicalise_str(&self, text: &str) -> Result<String, TernError> {
        let folded = (self.canonicalise)(&Value::from(text))?;
        String::from_utf8(folded.as_bytes().to_vec())
            .map_err(|_| TernError::Operations(format!("{} canonical form is not text", self.name)))
    }

    pub fn cmp(&self, a: &Value, b: &Value) -> Ordering {
        (self.compare)(a, b)
    }

    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        self.cmp(a, b) == Ordering::Equal
    }
}

impl std::fmt::Debug for Syntax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syntax").field("name", &self.name).finish()
    }
}

pub static OCTET_STRING: Syntax = Syntax {
    name: SYNTAX_OCTET_STRING,
    read: handler_copy,
    write: handler_copy,
    canonicalise: handler_copy,
    compare: compare_binary,
};

pub static DIRECTORY_STRING: Syntax = Syntax {
    name: SYNTAX_DIRECTORY_STRING,
    read: handler_copy,
    write: handler_copy,
    canonicalise: fold_case,
    compare: compare_fold,
};

pub static DN: Syntax = Syntax {
    name: SYNTAX_DN,
    read: handler_copy,
    write: handler_copy,
    canonicalise: canonicalise_dn,
    compare: compare_fold,
};

pub static OBJECT_CLASS: Syntax = Syntax {
    name: SYNTAX_OBJECT_CLASS,
    read: handler_copy,
    write: handler_copy,
    canonicalise: fold_case,
    compare: compare_fold,
};

pub static INTEGER: Syntax = Syntax {
    name: SYNTAX_INTEGER,
    read: handler_copy,
    write: handler_copy,
    canonicalise: canonicalise_integer,
    compare: compare_integer,
};

pub static BOOLEAN: Syntax = Syntax {
    name: SYNTAX_BOOLEAN,
    read: handler_copy,
    write: handler_copy,
    canonicalise: canonicalise_boolean,
    compare: compare_fold,
};

static BUILTINS: [&Syntax; 6] = [
    &OCTET_STRING,
    &DIRECTORY_STRING,
    &DN,
    &OBJECT_CLASS,
    &INTEGER,
    &BOOLEAN,
];

/// Looks up a built-in syntax by its registered name.
pub fn syntax_by_name(name: &str) -> Option<&'static Syntax> {
    BUILTINS
        .iter()
        .copied()
        .find(|s| s.name.eq_ignore_ascii_case(name))
}

fn handler_copy(val: &Value) -> Result<Value, TernError> {
    Ok(val.clone())
}

fn fold_case(val: &Value) -> Result<Value, TernError> {
    Ok(Value::new(val.as_bytes().to_ascii_uppercase()))
}

fn compare_binary(a: &Value, b: &Value) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

fn compare_fold(a: &Value, b: &Value) -> Ordering {
    let fa = a.as_bytes().iter().map(u8::to_ascii_uppercase);
    let fb = b.as_bytes().iter().map(u8::to_ascii_uppercase);
    fa.cmp(fb)
}

/// Folds a DN-valued attribute without consulting the schema: attribute
/// names and values are both case-folded component by component.
fn canonicalise_dn(val: &Value) -> Result<Value, TernError> {
    let text = val
        .as_str()
        .ok_or_else(|| TernError::Operations("DN value is not text".into()))?;
    if text.starts_with('@') {
        return Ok(val.clone());
    }
    Ok(Value::new(text.to_ascii_uppercase().into_bytes()))
}

fn canonicalise_integer(val: &Value) -> Result<Value, TernError> {
    let n = parse_integer(val).ok_or_else(|| {
        TernError::InvalidAttributeSyntax(format!(
            "'{}' is not an integer",
            String::from_utf8_lossy(val.as_bytes())
        ))
    })?;
    Ok(Value::from(n.to_string()))
}

fn compare_integer(a: &Value, b: &Value) -> Ordering {
    match (parse_integer(a), parse_integer(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => compare_binary(a, b),
    }
}

fn parse_integer(val: &Value) -> Option<i64> {
    val.as_str()?.trim().parse().ok()
}

fn canonicalise_boolean(val: &Value) -> Result<Value, TernError> {
    let text = val.as_str().unwrap_or_default();
    if text.eq_ignore_ascii_case("TRUE") {
        Ok(Value::from("TRUE"))
    } else if text.eq_ignore_ascii_case("FALSE") {
        Ok(Value::from("FALSE"))
    } else {
        Err(TernError::InvalidAttributeSyntax(format!(
            "'{text}' is not a boolean"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{DIRECTORY_STRING, INTEGER, OCTET_STRING, syntax_by_name};
    use crate::entry::Value;
    use std::cmp::Ordering;

    #[test]
    fn builtin_lookup_ignores_case() {
        assert!(syntax_by_name("directorystring").is_some());
        assert!(syntax_by_name("OCTETSTRING").is_some());
        assert!(syntax_by_name("utf8string").is_none());
    }

    #[test]
    fn directory_string_folds_and_compares_case_insensitively() {
        let canon = DIRECTORY_STRING
            .canonicalise(&Value::from("Alice"))
            .expect("canon");
        assert_eq!(canon.as_bytes(), b"ALICE");
        assert!(DIRECTORY_STRING.values_equal(&Value::from("abc"), &Value::from("ABC")));
    }

    #[test]
    fn octet_string_is_identity_and_binary() {
        let v = Value::new(vec![0x00, 0xFF]);
        assert_eq!(OCTET_STRING.canonicalise(&v).expect("canon"), v);
        assert!(!OCTET_STRING.values_equal(&Value::from("a"), &Value::from("A")));
    }

    #[test]
    fn integer_orders_numerically_and_canonicalises_decimal() {
        assert_eq!(
            INTEGER.cmp(&Value::from("9"), &Value::from("10")),
            Ordering::Less
        );
        let canon = INTEGER.canonicalise(&Value::from(" 007 ")).expect("canon");
        assert_eq!(canon.as_bytes(), b"7");
        assert!(INTEGER.canonicalise(&Value::from("seven")).is_err());
    }
}
