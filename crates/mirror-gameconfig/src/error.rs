use thiserror::Error;

/// Errors from decoding, merging, or converting the game configuration database.
#[derive(Debug, Error)]
pub enum Error {
    /// A row's field count does not match the table schema.
    #[error("table {table}, row {row}: expected {expected} fields, found {found}")]
    SchemaArityMismatch {
        /// Table name.
        table: String,
        /// Row id, or the schema marker when the schema itself is inconsistent.
        row: String,
        /// Number of columns declared by the schema.
        expected: usize,
        /// Number of fields present.
        found: usize,
    },

    /// A field does not parse as its declared column type.
    #[error("table {table}, row {row}, column {column}: expected {expected}, got {value:?}")]
    SchemaTypeMismatch {
        /// Table name.
        table: String,
        /// Row id.
        row: String,
        /// Column name.
        column: String,
        /// Declared type.
        expected: String,
        /// Offending raw value.
        value: String,
    },

    /// The `Id` or `DataType` schema row is missing.
    #[error("table {table} has no {marker} schema row")]
    MissingSchemaRow {
        /// Table name.
        table: String,
        /// Missing marker.
        marker: &'static str,
    },

    /// The table does not have the two-column id/payload shape.
    #[error("table {0} does not have an id and a payload column")]
    UnexpectedShape(String),

    /// A row payload failed to decode.
    #[error("table {table}, row {row}: {source}")]
    Row {
        /// Table name.
        table: String,
        /// Row id.
        row: String,
        /// Underlying decoding error.
        #[source]
        source: mirror_codec::Error,
    },

    /// A table of an update database could not be decoded, so it was not merged.
    #[error("update table {table} could not be decoded: {source}")]
    UpdateTable {
        /// Table name.
        table: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for mirror-gameconfig operations.
pub type Result<T> = std::result::Result<T, Error>;
