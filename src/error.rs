use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernErrorCode {
    Operations,
    Protocol,
    Busy,
    TimeLimitExceeded,
    NoSuchObject,
    EntryAlreadyExists,
    NoSuchAttribute,
    AttributeOrValueExists,
    InvalidAttributeSyntax,
    InsufficientAccess,
    UnsupportedCriticalExtension,
}

impl TernErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TernErrorCode::Operations => "operations_error",
            TernErrorCode::Protocol => "protocol_error",
            TernErrorCode::Busy => "busy",
            TernErrorCode::TimeLimitExceeded => "time_limit_exceeded",
            TernErrorCode::NoSuchObject => "no_such_object",
            TernErrorCode::EntryAlreadyExists => "entry_already_exists",
            TernErrorCode::NoSuchAttribute => "no_such_attribute",
            TernErrorCode::AttributeOrValueExists => "attribute_or_value_exists",
            TernErrorCode::InvalidAttributeSyntax => "invalid_attribute_syntax",
            TernErrorCode::InsufficientAccess => "insufficient_access",
            TernErrorCode::UnsupportedCriticalExtension => "unsupported_critical_extension",
        }
    }
}

#[derive(Debug, Error)]
pub enum TernError {
    #[error("operations error: {0}")]
    Operations(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("database is busy")]
    Busy,
    #[error("time limit exceeded waiting for the store lock")]
    TimeLimitExceeded,
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("entry {0} already exists")]
    EntryAlreadyExists(String),
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),
    #[error("attribute or value exists: {0}")]
    AttributeOrValueExists(String),
    #[error("invalid attribute syntax: {0}")]
    InvalidAttributeSyntax(String),
    #[error("insufficient access rights")]
    InsufficientAccess,
    #[error("unsupported critical extension: {0}")]
    UnsupportedCriticalExtension(String),
}

impl TernError {
    pub fn code(&self) -> TernErrorCode {
        match self {
            TernError::Operations(_) => TernErrorCode::Operations,
            TernError::Protocol(_) => TernErrorCode::Protocol,
            TernError::Busy => TernErrorCode::Busy,
            TernError::TimeLimitExceeded => TernErrorCode::TimeLimitExceeded,
            TernError::NoSuchObject(_) => TernErrorCode::NoSuchObject,
            TernError::EntryAlreadyExists(_) => TernErrorCode::EntryAlreadyExists,
            TernError::NoSuchAttribute(_) => TernErrorCode::NoSuchAttribute,
            TernError::AttributeOrValueExists(_) => TernErrorCode::AttributeOrValueExists,
            TernError::InvalidAttributeSyntax(_) => TernErrorCode::InvalidAttributeSyntax,
            TernError::InsufficientAccess => TernErrorCode::InsufficientAccess,
            TernError::UnsupportedCriticalExtension(_) => {
                TernErrorCode::UnsupportedCriticalExtension
            }
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
