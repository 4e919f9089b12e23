use crate::{Error, Result};
use log::{debug, info, warn};
use mirror_codec::decode_row;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};
use rusqlite::{params, Connection, OptionalExtension};
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Row id of the column-name schema row.
pub const ID_MARKER: &str = "Id";

/// Row id of the column-type schema row.
pub const DATATYPE_MARKER: &str = "DataType";

/// Separator between positional fields in a payload.
pub const FIELD_DELIMITER: &str = "#@#";

/// Table of the update database holding SQL to replay.
pub const UPDATE_SQL_TABLE: &str = "sql";

const PATCH_SCHEMA: &str = "patch";

/// Id of a config row; tables mix integer data ids with text schema ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowId {
    /// Integer id.
    Int(i64),
    /// Text id.
    Text(String),
}

impl RowId {
    fn from_sql(value: SqlValue) -> Self {
        match value {
            SqlValue::Integer(i) => RowId::Int(i),
            SqlValue::Text(s) => RowId::Text(s),
            SqlValue::Real(f) => RowId::Text(f.to_string()),
            SqlValue::Blob(b) => RowId::Text(String::from_utf8_lossy(&b).into_owned()),
            SqlValue::Null => RowId::Text(String::new()),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Int(i) => write!(f, "{}", i),
            RowId::Text(s) => f.write_str(s),
        }
    }
}

impl ToSql for RowId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            RowId::Int(i) => i.to_sql(),
            RowId::Text(s) => s.to_sql(),
        }
    }
}

/// One `(id, payload)` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRow {
    /// Row id.
    pub id: RowId,
    /// Plain or marker-prefixed payload.
    pub payload: String,
}

/// Names of the id and payload columns of a config table.
#[derive(Debug, Clone)]
struct TableColumns {
    id: String,
    payload: String,
}

/// Outcome of decoding every table.
#[derive(Debug, Default)]
pub struct DecodeReport {
    /// Tables decoded, with the number of rows rewritten.
    pub decoded: Vec<(String, usize)>,
    /// Tables left untouched because decoding failed.
    pub failed: Vec<(String, Error)>,
}

/// A game configuration database.
#[derive(Debug)]
pub struct ConfigDatabase {
    conn: Connection,
    path: Option<PathBuf>,
}

impl ConfigDatabase {
    /// Open the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            conn: Connection::open(path)?,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: None,
        })
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get the database file path, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// List user tables in schema order.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn columns(&self, table: &str) -> Result<TableColumns> {
        let stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} LIMIT 0", quote_ident(table)))?;
        let names = stmt.column_names();
        if names.len() < 2 {
            return Err(Error::UnexpectedShape(table.to_string()));
        }
        Ok(TableColumns {
            id: names[0].to_string(),
            payload: names[1].to_string(),
        })
    }

    fn query_rows(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<ConfigRow>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(ConfigRow {
                    id: RowId::from_sql(row.get(0)?),
                    payload: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fetch every row of a table.
    pub fn select_all(&self, table: &str) -> Result<Vec<ConfigRow>> {
        let cols = self.columns(table)?;
        let sql = format!(
            "SELECT {}, {} FROM {}",
            quote_ident(&cols.id),
            quote_ident(&cols.payload),
            quote_ident(table)
        );
        self.query_rows(&sql, &[])
    }

    /// Fetch the row with the given text id.
    pub fn select_where_id(&self, table: &str, id: &str) -> Result<Option<ConfigRow>> {
        let cols = self.columns(table)?;
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} = ?1",
            quote_ident(&cols.id),
            quote_ident(&cols.payload),
            quote_ident(table),
            quote_ident(&cols.id)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let row = stmt
            .query_row(params![id], |row| {
                Ok(ConfigRow {
                    id: RowId::from_sql(row.get(0)?),
                    payload: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Fetch all rows except the two schema rows, ordered by id.
    pub fn select_data_rows(&self, table: &str) -> Result<Vec<ConfigRow>> {
        let cols = self.columns(table)?;
        let id = quote_ident(&cols.id);
        let sql = format!(
            "SELECT {id}, {} FROM {} WHERE {id} NOT IN (?1, ?2) ORDER BY {id}",
            quote_ident(&cols.payload),
            quote_ident(table),
        );
        self.query_rows(&sql, &[&ID_MARKER, &DATATYPE_MARKER])
    }

    /// Overwrite the payload of the row with the given id.
    pub fn replace_row(&self, table: &str, id: &RowId, payload: &str) -> Result<()> {
        let cols = self.columns(table)?;
        replace_row_with(&self.conn, table, &cols, id, payload)
    }

    /// Execute one or more `;`-separated SQL statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Start a transaction on the underlying connection.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Decode every encrypted payload of a table in a single transaction.
    ///
    /// Returns the number of rewritten rows. On error nothing is written.
    pub fn decode_table(&mut self, table: &str) -> Result<usize> {
        let cols = self.columns(table)?;
        let rows = self.select_all(table)?;

        let tx = self.conn.transaction()?;
        let mut rewritten = 0;
        for row in &rows {
            let decoded = decode_row(&row.payload).map_err(|source| Error::Row {
                table: table.to_string(),
                row: row.id.to_string(),
                source,
            })?;
            if let Cow::Owned(plain) = decoded {
                replace_row_with(&tx, table, &cols, &row.id, &plain)?;
                rewritten += 1;
            }
        }
        tx.commit()?;

        debug!("Decoded {} of {} rows in {}", rewritten, rows.len(), table);
        Ok(rewritten)
    }

    /// Decode every table. A failing table is rolled back and reported.
    pub fn decode_tables(&mut self) -> Result<DecodeReport> {
        let mut report = DecodeReport::default();
        for table in self.list_tables()? {
            match self.decode_table(&table) {
                Ok(count) => report.decoded.push((table, count)),
                Err(e) => {
                    warn!("Failed to decode table {}: {}", table, e);
                    report.failed.push((table, e));
                }
            }
        }
        Ok(report)
    }

    /// Replay the SQL stored in a decoded update database, then delete it.
    ///
    /// All statements run in one transaction. Returns the number of replayed
    /// payloads.
    pub fn merge_update<P: AsRef<Path>>(&mut self, update_db: P) -> Result<usize> {
        let update_db = update_db.as_ref();
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", PATCH_SCHEMA),
            params![update_db.to_string_lossy().into_owned()],
        )?;

        let replayed = self.replay_attached();
        self.conn
            .execute(&format!("DETACH DATABASE {}", PATCH_SCHEMA), [])?;
        let replayed = replayed?;

        fs::remove_file(update_db)?;
        info!(
            "Merged {} statement batches from {}",
            replayed,
            update_db.display()
        );
        Ok(replayed)
    }

    fn replay_attached(&mut self) -> Result<usize> {
        let sql = format!(
            "SELECT * FROM {}.{}",
            PATCH_SCHEMA,
            quote_ident(UPDATE_SQL_TABLE)
        );
        let batches = self.query_rows(&sql, &[])?;

        let tx = self.conn.transaction()?;
        for batch in &batches {
            tx.execute_batch(&batch.payload)?;
        }
        tx.commit()?;
        Ok(batches.len())
    }
}

fn replace_row_with(
    conn: &Connection,
    table: &str,
    cols: &TableColumns,
    id: &RowId,
    payload: &str,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET {} = ?2 WHERE {} = ?1",
        quote_ident(table),
        quote_ident(&cols.payload),
        quote_ident(&cols.id)
    );
    conn.execute(&sql, params![id, payload])?;
    Ok(())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_codec::encode_row;

    fn sample_db() -> ConfigDatabase {
        let db = ConfigDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE monster (Id PRIMARY KEY, Data TEXT);
             CREATE TABLE item (Id PRIMARY KEY, Data TEXT);",
        )
        .unwrap();
        db
    }

    #[test]
    fn test_list_tables() {
        let db = sample_db();
        assert_eq!(db.list_tables().unwrap(), vec!["monster", "item"]);
    }

    #[test]
    fn test_decode_table_rewrites_encrypted_rows() {
        let mut db = sample_db();
        db.connection()
            .execute(
                "INSERT INTO monster VALUES ('Id', ?1), (1, ?2), (2, 'plain')",
                params![encode_row("hp#@#name"), encode_row("100#@#Slime")],
            )
            .unwrap();

        assert_eq!(db.decode_table("monster").unwrap(), 2);

        let schema = db.select_where_id("monster", ID_MARKER).unwrap().unwrap();
        assert_eq!(schema.payload, "hp#@#name");
        let rows = db.select_data_rows("monster").unwrap();
        assert_eq!(rows[0].id, RowId::Int(1));
        assert_eq!(rows[0].payload, "100#@#Slime");
        assert_eq!(rows[1].payload, "plain");
    }

    #[test]
    fn test_failed_table_is_rolled_back() {
        let mut db = sample_db();
        let good = encode_row("ok");
        db.connection()
            .execute(
                "INSERT INTO item VALUES (1, ?1), (2, '`zz')",
                params![good],
            )
            .unwrap();

        let report = db.decode_tables().unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "item");
        assert!(matches!(report.failed[0].1, Error::Row { .. }));

        let rows = db.select_all("item").unwrap();
        assert_eq!(rows[0].payload, good);
    }

    #[test]
    fn test_select_where_id_missing() {
        let db = sample_db();
        assert!(db.select_where_id("monster", DATATYPE_MARKER).unwrap().is_none());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
