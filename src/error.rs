use parse_display::Display;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors raised by stores, computed values and the mixer.
#[non_exhaustive]
#[derive(Display, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A validator rejected a pending update.
    #[display("{0}")]
    Validation(String),

    /// A computed value was read after [`dispose`](crate::Computed::dispose).
    #[display("computed value used after dispose")]
    Disposed,

    /// A computed value was read again while it was being evaluated.
    #[display("detect cyclic dependency")]
    Circular,

    /// A patch names a field the record does not have.
    #[display("unknown field `{field}`")]
    UnknownField { field: String },

    /// A patch value does not fit the field it targets.
    #[display("field `{field}` expects {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    /// Raised by user middleware or a fallible patch producer.
    #[display("{0}")]
    Rejected(String),
}

impl StoreError {
    pub const DEFAULT_VALIDATION_MESSAGE: &'static str = "Validation failed";

    pub fn rejected(message: impl Into<String>) -> Self {
        StoreError::Rejected(message.into())
    }
    pub fn field_type(field: &str, expected: &'static str) -> Self {
        StoreError::FieldType {
            field: field.to_string(),
            expected,
        }
    }
}

impl std::error::Error for StoreError {}
