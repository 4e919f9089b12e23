//! # mirror-gameconfig
//!
//! Game configuration database handling.
//!
//! The client ships its configuration as a SQLite database whose tables hold
//! `(id, payload)` rows. Payloads may be row-encrypted, and every table
//! carries its own schema in the `Id` and `DataType` rows. This crate
//! decodes those tables in place, replays update databases into the main
//! one, and converts each table into a JSON document.
//!
//! ## Example
//!
//! ```ignore
//! use mirror_gameconfig::{convert_database, ConfigDatabase};
//!
//! let mut db = ConfigDatabase::open("gameConfig.db")?;
//! db.decode_tables()?;
//! let report = convert_database(&db, "gameconfig".as_ref())?;
//! ```

mod convert;
mod database;
mod error;

pub use convert::{
    convert_database, convert_field, convert_table, convert_table_to_dir, write_document,
    ColumnType, ConversionReport, TableDocument, TableSchema,
};
pub use database::{
    ConfigDatabase, ConfigRow, DecodeReport, RowId, DATATYPE_MARKER, FIELD_DELIMITER, ID_MARKER,
    UPDATE_SQL_TABLE,
};
pub use error::{Error, Result};

use log::info;
use std::path::Path;

/// Decode a freshly extracted database in place and convert it to JSON.
pub fn import_database(db_path: &Path, json_dir: &Path) -> Result<ConversionReport> {
    let mut db = ConfigDatabase::open(db_path)?;
    let decoded = db.decode_tables()?;
    info!(
        "Decoded {} tables of {} ({} failed)",
        decoded.decoded.len(),
        db_path.display(),
        decoded.failed.len()
    );
    convert_database(&db, json_dir)
}

/// Decode an update database, merge it into the main one, then regenerate
/// every JSON document.
pub fn apply_update_database(
    main_db: &Path,
    update_db: &Path,
    json_dir: &Path,
) -> Result<ConversionReport> {
    {
        let mut update = ConfigDatabase::open(update_db)?;
        let decoded = update.decode_tables()?;
        if let Some((table, err)) = decoded.failed.into_iter().next() {
            return Err(Error::UpdateTable {
                table,
                source: Box::new(err),
            });
        }
    }

    let mut db = ConfigDatabase::open(main_db)?;
    db.merge_update(update_db)?;
    convert_database(&db, json_dir)
}
