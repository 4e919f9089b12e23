//! Conversion of config tables into JSON documents.
//!
//! Every table stores its own schema in two rows: the `Id` row lists the
//! column names and the `DataType` row lists their types, both separated by
//! [`FIELD_DELIMITER`]. The document maps each data row id to an object of
//! column name to typed value.

use crate::database::{
    ConfigDatabase, ConfigRow, RowId, DATATYPE_MARKER, FIELD_DELIMITER, ID_MARKER,
};
use crate::{Error, Result};
use log::{debug, info, warn};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Declared type of a config column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Long,
    Double,
    Array,
    Dict,
    Auto,
}

impl FromStr for ColumnType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "string" => Ok(ColumnType::String),
            "int" => Ok(ColumnType::Int),
            "long" => Ok(ColumnType::Long),
            "double" => Ok(ColumnType::Double),
            "array" => Ok(ColumnType::Array),
            "dict" => Ok(ColumnType::Dict),
            "auto" => Ok(ColumnType::Auto),
            _ => Err(()),
        }
    }
}

impl ColumnType {
    fn name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::Array => "array",
            ColumnType::Dict => "dict",
            ColumnType::Auto => "auto",
        }
    }
}

/// Column names and types of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<(String, ColumnType)>,
}

impl TableSchema {
    /// Build a schema from the raw `Id` and `DataType` payloads.
    pub fn parse(table: &str, names: &str, types: &str) -> Result<Self> {
        let names: Vec<&str> = names.split(FIELD_DELIMITER).collect();
        let types: Vec<&str> = types.split(FIELD_DELIMITER).collect();
        if names.len() != types.len() {
            return Err(Error::SchemaArityMismatch {
                table: table.to_string(),
                row: DATATYPE_MARKER.to_string(),
                expected: names.len(),
                found: types.len(),
            });
        }

        let columns = names
            .into_iter()
            .zip(types)
            .map(|(name, ty)| {
                let ty = ty.parse().map_err(|_| Error::SchemaTypeMismatch {
                    table: table.to_string(),
                    row: DATATYPE_MARKER.to_string(),
                    column: name.to_string(),
                    expected: "a known column type".to_string(),
                    value: ty.to_string(),
                })?;
                Ok((name.to_string(), ty))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            table: table.to_string(),
            columns,
        })
    }

    /// Read the schema rows of `table`.
    pub fn load(db: &ConfigDatabase, table: &str) -> Result<Self> {
        let names = db
            .select_where_id(table, ID_MARKER)?
            .ok_or_else(|| Error::MissingSchemaRow {
                table: table.to_string(),
                marker: ID_MARKER,
            })?;
        let types = db
            .select_where_id(table, DATATYPE_MARKER)?
            .ok_or_else(|| Error::MissingSchemaRow {
                table: table.to_string(),
                marker: DATATYPE_MARKER,
            })?;
        Self::parse(table, &names.payload, &types.payload)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Convert one data row into a column-name to value object.
    pub fn convert_row(&self, row: &ConfigRow) -> Result<Map<String, Value>> {
        let fields: Vec<&str> = row.payload.split(FIELD_DELIMITER).collect();
        if fields.len() != self.columns.len() {
            return Err(Error::SchemaArityMismatch {
                table: self.table.clone(),
                row: row.id.to_string(),
                expected: self.columns.len(),
                found: fields.len(),
            });
        }

        let mut out = Map::new();
        for ((name, ty), raw) in self.columns.iter().zip(fields) {
            let value = convert_field(*ty, raw).ok_or_else(|| Error::SchemaTypeMismatch {
                table: self.table.clone(),
                row: row.id.to_string(),
                column: name.clone(),
                expected: ty.name().to_string(),
                value: raw.to_string(),
            })?;
            out.insert(name.clone(), value);
        }
        Ok(out)
    }
}

/// Convert one raw field; `None` when it does not parse as `ty`.
pub fn convert_field(ty: ColumnType, raw: &str) -> Option<Value> {
    match ty {
        ColumnType::String => Some(Value::String(raw.to_string())),
        // blank numeric cells are kept verbatim
        ColumnType::Int | ColumnType::Long | ColumnType::Double if raw.is_empty() => {
            Some(Value::String(String::new()))
        }
        ColumnType::Int | ColumnType::Long => raw.trim().parse::<i64>().ok().map(Value::from),
        ColumnType::Double => {
            let f = raw.trim().parse::<f64>().ok()?;
            Some(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        ColumnType::Array | ColumnType::Dict | ColumnType::Auto => {
            if raw.is_empty() {
                Some(Value::Object(Map::new()))
            } else {
                serde_json::from_str(raw).ok()
            }
        }
    }
}

/// Converted rows of one table.
///
/// Integer ids come first in numeric order, followed by text ids in
/// lexical order. Serializing keeps that order; column keys stay sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableDocument {
    rows: BTreeMap<RowId, Map<String, Value>>,
}

impl TableDocument {
    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Converted object of one row.
    pub fn get(&self, id: &RowId) -> Option<&Map<String, Value>> {
        self.rows.get(id)
    }

    /// Row ids in document order.
    pub fn ids(&self) -> impl Iterator<Item = &RowId> {
        self.rows.keys()
    }

    /// The document as a plain JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.rows
                .iter()
                .map(|(id, row)| (id.to_string(), Value::Object(row.clone())))
                .collect(),
        )
    }
}

impl Serialize for TableDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rows.len()))?;
        for (id, row) in &self.rows {
            map.serialize_entry(&id.to_string(), row)?;
        }
        map.end()
    }
}

/// Convert a whole table into its document.
pub fn convert_table(db: &ConfigDatabase, table: &str) -> Result<TableDocument> {
    let schema = TableSchema::load(db, table)?;
    let mut document = TableDocument::default();
    for row in db.select_data_rows(table)? {
        let object = schema.convert_row(&row)?;
        document.rows.insert(row.id, object);
    }
    Ok(document)
}

/// Convert a table and write it to `<out_dir>/<table>.json`.
pub fn convert_table_to_dir(
    db: &ConfigDatabase,
    table: &str,
    out_dir: &Path,
) -> Result<TableDocument> {
    let document = convert_table(db, table)?;
    let path = out_dir.join(format!("{}.json", table));
    write_document(&document, &path)?;
    debug!("Wrote {}", path.display());
    Ok(document)
}

/// Write a document with four-space indentation and literal non-ASCII text.
pub fn write_document<T: Serialize + ?Sized>(document: &T, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let mut ser =
        serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
    document.serialize(&mut ser)?;
    writer.flush()?;
    Ok(())
}

/// Outcome of converting every table.
#[derive(Debug, Default)]
pub struct ConversionReport {
    /// Documents written.
    pub written: Vec<PathBuf>,
    /// Tables that could not be converted.
    pub failed: Vec<(String, Error)>,
}

/// Convert every table of the database into `out_dir`.
pub fn convert_database(db: &ConfigDatabase, out_dir: &Path) -> Result<ConversionReport> {
    fs::create_dir_all(out_dir)?;

    let mut report = ConversionReport::default();
    for table in db.list_tables()? {
        match convert_table_to_dir(db, &table, out_dir) {
            Ok(_) => report.written.push(out_dir.join(format!("{}.json", table))),
            Err(e) => {
                warn!("Failed to convert table {}: {}", table, e);
                report.failed.push((table, e));
            }
        }
    }

    info!(
        "Converted {} tables into {} ({} failed)",
        report.written.len(),
        out_dir.display(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_field_types() {
        assert_eq!(convert_field(ColumnType::Int, "100"), Some(json!(100)));
        assert_eq!(convert_field(ColumnType::Long, "-9000000000"), Some(json!(-9000000000i64)));
        assert_eq!(convert_field(ColumnType::Double, "1.5"), Some(json!(1.5)));
        assert_eq!(convert_field(ColumnType::String, ""), Some(json!("")));
        assert_eq!(convert_field(ColumnType::Array, "[1,2]"), Some(json!([1, 2])));
        assert_eq!(convert_field(ColumnType::Dict, ""), Some(json!({})));
        assert_eq!(convert_field(ColumnType::Auto, "{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(convert_field(ColumnType::Int, ""), Some(json!("")));
        assert_eq!(convert_field(ColumnType::Int, "ten"), None);
        assert_eq!(convert_field(ColumnType::Array, "[1,"), None);
    }

    #[test]
    fn test_schema_rejects_unknown_type() {
        let err = TableSchema::parse("t", "a#@#b", "int#@#float").unwrap_err();
        assert!(matches!(err, Error::SchemaTypeMismatch { ref value, .. } if value == "float"));
    }

    #[test]
    fn test_schema_arity() {
        let err = TableSchema::parse("t", "a#@#b", "int").unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaArityMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_row_arity_is_not_padded() {
        let schema = TableSchema::parse("t", "hp#@#name", "int#@#string").unwrap();
        let row = ConfigRow {
            id: RowId::Int(3),
            payload: "100".to_string(),
        };
        let err = schema.convert_row(&row).unwrap_err();
        assert!(err.to_string().contains("row 3"));
    }

    #[test]
    fn test_type_mismatch_names_column() {
        let schema = TableSchema::parse("t", "hp#@#name", "int#@#string").unwrap();
        let row = ConfigRow {
            id: RowId::Int(1),
            payload: "lots#@#Slime".to_string(),
        };
        let err = schema.convert_row(&row).unwrap_err();
        assert!(matches!(err, Error::SchemaTypeMismatch { ref column, .. } if column == "hp"));
    }

    #[test]
    fn test_integer_ids_precede_text_ids_in_numeric_order() {
        let mut document = TableDocument::default();
        let ids = [
            RowId::Text("b".into()),
            RowId::Int(10),
            RowId::Text("a".into()),
            RowId::Int(2),
        ];
        for id in ids {
            document.rows.insert(id, Map::new());
        }
        let ids: Vec<String> = document.ids().map(ToString::to_string).collect();
        assert_eq!(ids, ["2", "10", "a", "b"]);

        let text = serde_json::to_string(&document).unwrap();
        assert_eq!(text, r#"{"2":{},"10":{},"a":{},"b":{}}"#);
    }
}
