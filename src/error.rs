//! Error types for entitylite.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - A fatal/recoverable split (schema and enum defects are never recovered)
//! - Structured JSON output for tooling that consumes failures programmatically

use thiserror::Error;

/// Result type alias for entitylite operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by the component that raises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Schema definition
    SchemaDefinition,
    DuplicateTable,
    InvalidEnumValue,

    // Serialization / conversion
    UnregisteredType,
    DuplicateSerializer,
    Serialization,
    UnsupportedConversion,
    Overflow,
    Format,

    // Synthesis
    MissingKey,
    UnsupportedPredicate,

    // Execution
    Migration,
    DatabaseError,

    // Environment
    ConfigError,
    IoError,
    JsonError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::SchemaDefinition => "SCHEMA_DEFINITION",
            Self::DuplicateTable => "DUPLICATE_TABLE",
            Self::InvalidEnumValue => "INVALID_ENUM_VALUE",
            Self::UnregisteredType => "UNREGISTERED_TYPE",
            Self::DuplicateSerializer => "DUPLICATE_SERIALIZER",
            Self::Serialization => "SERIALIZATION",
            Self::UnsupportedConversion => "UNSUPPORTED_CONVERSION",
            Self::Overflow => "OVERFLOW",
            Self::Format => "FORMAT",
            Self::MissingKey => "MISSING_KEY",
            Self::UnsupportedPredicate => "UNSUPPORTED_PREDICATE",
            Self::Migration => "MIGRATION",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
        }
    }

    /// Whether the failure indicates a defect in the schema or the synthesizer.
    ///
    /// Fatal errors are raised at startup or signal a programming error; they
    /// are never caught and retried internally.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SchemaDefinition | Self::DuplicateTable | Self::InvalidEnumValue
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur while modeling, synthesizing or executing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Schema definition error in {object}: {message}")]
    SchemaDefinition { object: String, message: String },

    #[error("Table already registered for entity type {entity}")]
    DuplicateTable { entity: String },

    #[error("Invalid {kind} value: {value}")]
    InvalidEnumValue { kind: &'static str, value: String },

    #[error("No serializer registered for type {type_name}")]
    UnregisteredType { type_name: String },

    #[error("Serializer already registered for type {type_name}")]
    DuplicateSerializer { type_name: String },

    #[error("Cannot serialize {type_name}: {message}")]
    Serialization { type_name: String, message: String },

    #[error("Unsupported conversion from {from} to {to}: {reason}")]
    UnsupportedConversion {
        from: String,
        to: String,
        reason: &'static str,
    },

    #[error("Value {value} overflows {target}")]
    Overflow { value: String, target: String },

    #[error("Cannot parse '{input}' as {target}")]
    Format { input: String, target: String },

    #[error("Missing key column {column} on table {table}")]
    MissingKey { table: String, column: String },

    #[error("Unsupported predicate node: {node}")]
    UnsupportedPredicate { node: String },

    #[error("Migration failed at step '{step}': {source}")]
    Migration {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a schema-definition failure on a named object.
    pub(crate) fn schema(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaDefinition {
            object: object.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_predicate(node: impl Into<String>) -> Self {
        Self::UnsupportedPredicate { node: node.into() }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::SchemaDefinition { .. } => ErrorCode::SchemaDefinition,
            Self::DuplicateTable { .. } => ErrorCode::DuplicateTable,
            Self::InvalidEnumValue { .. } => ErrorCode::InvalidEnumValue,
            Self::UnregisteredType { .. } => ErrorCode::UnregisteredType,
            Self::DuplicateSerializer { .. } => ErrorCode::DuplicateSerializer,
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::UnsupportedConversion { .. } => ErrorCode::UnsupportedConversion,
            Self::Overflow { .. } => ErrorCode::Overflow,
            Self::Format { .. } => ErrorCode::Format,
            Self::MissingKey { .. } => ErrorCode::MissingKey,
            Self::UnsupportedPredicate { .. } => ErrorCode::UnsupportedPredicate,
            Self::Migration { .. } => ErrorCode::Migration,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Whether this error is fatal, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.error_code().is_fatal()
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "fatal": code.is_fatal(),
            }
        });

        if let Self::Migration { step, source } = self {
            obj["error"]["step"] = serde_json::Value::String(step.clone());
            obj["error"]["cause"] = serde_json::Value::String(source.error_code().as_str().into());
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let codes = [
            ErrorCode::SchemaDefinition,
            ErrorCode::DuplicateTable,
            ErrorCode::InvalidEnumValue,
            ErrorCode::UnregisteredType,
            ErrorCode::DuplicateSerializer,
            ErrorCode::Serialization,
            ErrorCode::UnsupportedConversion,
            ErrorCode::Overflow,
            ErrorCode::Format,
            ErrorCode::MissingKey,
            ErrorCode::UnsupportedPredicate,
            ErrorCode::Migration,
            ErrorCode::DatabaseError,
            ErrorCode::ConfigError,
            ErrorCode::IoError,
            ErrorCode::JsonError,
        ];
        let strings: std::collections::HashSet<&str> = codes.iter().map(ErrorCode::as_str).collect();
        assert_eq!(strings.len(), codes.len());
    }

    #[test]
    fn test_fatal_split() {
        assert!(Error::schema("Person", "no primary key").is_fatal());
        assert!(
            Error::InvalidEnumValue {
                kind: "collation",
                value: "FOO".into()
            }
            .is_fatal()
        );
        assert!(
            !Error::MissingKey {
                table: "Person".into(),
                column: "id".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_structured_json_for_migration() {
        let err = Error::Migration {
            step: "copy rows into Person".into(),
            source: Box::new(Error::Config("boom".into())),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "MIGRATION");
        assert_eq!(json["error"]["cause"], "CONFIG_ERROR");
        assert_eq!(json["error"]["fatal"], false);
    }
}
