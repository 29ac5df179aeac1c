//! Building blocks shared by migrations.
//!
//! `SQLite` cannot drop or retype columns in place, so a shape change is a
//! rebuild: rename the table aside, create the new shape under the original
//! name, copy rows across, drop the renamed table, and recreate the indices
//! the rename carried off.

use rusqlite::Connection;
use tracing::debug;

use crate::errors::Result;
use crate::sqlite::schema;

/// An index to (re)create on a table.
#[derive(Clone, Copy, Debug)]
pub struct Index<'a> {
    /// Index name, unique in the database.
    pub name: &'a str,
    /// Indexed table.
    pub table: &'a str,
    /// Comma-separated indexed columns.
    pub columns: &'a str,
}

/// How rows move from the renamed table into the rebuilt one.
#[derive(Clone, Copy, Debug)]
pub struct RowCopy<'a> {
    /// Column list on the new table.
    pub into: &'a str,
    /// Select list evaluated against the old table.
    pub select: &'a str,
    /// Trailing clause after `FROM <old>` (e.g. `GROUP BY ...`); may be empty.
    pub tail: &'a str,
}

/// A complete table rebuild.
#[derive(Clone, Copy, Debug)]
pub struct Rebuild<'a> {
    /// Table to rebuild; keeps its name.
    pub table: &'a str,
    /// Column and constraint definitions of the new shape.
    pub definition: &'a str,
    /// Indices to recreate under their original names.
    pub indices: &'a [Index<'a>],
    /// Row transfer.
    pub copy: RowCopy<'a>,
}

/// Name used for a table while it is being rebuilt.
pub fn temp_name(table: &str) -> String {
    format!("{table}_temp")
}

/// Create `table` unless it already exists. Returns whether it was created.
pub fn create_table_if_absent(conn: &Connection, table: &str, definition: &str) -> Result<bool> {
    if schema::table_exists(conn, table)? {
        debug!(table, "table exists, skipping create");
        return Ok(false);
    }
    create_table(conn, table, definition)?;
    Ok(true)
}

/// Create `table` unconditionally.
pub fn create_table(conn: &Connection, table: &str, definition: &str) -> Result<()> {
    conn.execute_batch(&format!("CREATE TABLE {table} ({definition});"))?;
    Ok(())
}

/// Drop `table` if present.
pub fn drop_table(conn: &Connection, table: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    Ok(())
}

/// Create an index unless one of that name exists.
pub fn create_index(conn: &Connection, index: Index<'_>) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
        index.name, index.table, index.columns
    ))?;
    Ok(())
}

/// Add `column` to `table` unless it is already there.
pub fn add_column_if_absent(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<bool> {
    if schema::column_exists(conn, table, column)? {
        debug!(table, column, "column exists, skipping add");
        return Ok(false);
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD {column} {definition};"))?;
    Ok(true)
}

/// Rename `table` aside and drop the indices it carried. Returns the new name.
pub fn rename_aside(conn: &Connection, table: &str, indices: &[Index<'_>]) -> Result<String> {
    let temp = temp_name(table);
    // A leftover from an interrupted rebuild would block the rename.
    drop_table(conn, &temp)?;
    conn.execute_batch(&format!("ALTER TABLE {table} RENAME TO {temp};"))?;
    for index in indices {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {};", index.name))?;
    }
    Ok(temp)
}

/// Rebuild a table into a new shape, preserving its rows through `copy`.
///
/// A missing source table is created in the new shape with no rows.
pub fn rebuild_table(conn: &Connection, rebuild: &Rebuild<'_>) -> Result<()> {
    let Rebuild {
        table,
        definition,
        indices,
        copy,
    } = *rebuild;

    if !schema::table_exists(conn, table)? {
        debug!(table, "rebuild source missing, creating empty");
        create_table(conn, table, definition)?;
        for index in indices {
            create_index(conn, *index)?;
        }
        return Ok(());
    }

    let temp = rename_aside(conn, table, indices)?;
    create_table(conn, table, definition)?;
    for index in indices {
        create_index(conn, *index)?;
    }
    let copied = conn.execute(
        &format!(
            "INSERT INTO {table} ({}) SELECT {} FROM {temp} {}",
            copy.into, copy.select, copy.tail
        ),
        [],
    )?;
    drop_table(conn, &temp)?;

    debug!(table, rows = copied, "table rebuilt");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WIDGET_INDEX: Index<'static> = Index {
        name: "widget_owner_index",
        table: "widget",
        columns: "owner",
    };

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn create_if_absent_twice_leaves_schema_identical() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(create_table_if_absent(&conn, "widget", "owner TEXT NOT NULL").unwrap());
        create_index(&conn, WIDGET_INDEX).unwrap();
        let before = schema::dump(&conn).unwrap();

        assert!(!create_table_if_absent(&conn, "widget", "owner TEXT NOT NULL").unwrap());
        create_index(&conn, WIDGET_INDEX).unwrap();
        assert_eq!(before, schema::dump(&conn).unwrap());
    }

    #[test]
    fn add_column_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_table(&conn, "widget", "owner TEXT").unwrap();
        assert!(add_column_if_absent(&conn, "widget", "size", "INTEGER DEFAULT 0 NOT NULL").unwrap());
        assert!(!add_column_if_absent(&conn, "widget", "size", "INTEGER DEFAULT 0 NOT NULL").unwrap());
        assert!(schema::column_exists(&conn, "widget", "size").unwrap());
    }

    #[test]
    fn rebuild_transforms_rows_and_restores_indices() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE widget (owner TEXT, size INTEGER, colour TEXT);
             CREATE INDEX widget_owner_index ON widget (owner);
             INSERT INTO widget VALUES ('a', 1, 'red'), ('a', 2, 'blue'), ('b', 5, 'red');",
        )
        .unwrap();

        rebuild_table(
            &conn,
            &Rebuild {
                table: "widget",
                definition: "owner TEXT NOT NULL, size INTEGER NOT NULL",
                indices: &[WIDGET_INDEX],
                copy: RowCopy {
                    into: "owner, size",
                    select: "owner, SUM(size)",
                    tail: "GROUP BY owner",
                },
            },
        )
        .unwrap();

        assert_eq!(count(&conn, "widget"), 2);
        assert!(!schema::column_exists(&conn, "widget", "colour").unwrap());
        assert!(!schema::table_exists(&conn, "widget_temp").unwrap());
        assert!(schema::index_exists(&conn, "widget_owner_index").unwrap());

        let total: i64 = conn
            .query_row("SELECT size FROM widget WHERE owner = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn rebuild_of_missing_table_creates_it_empty() {
        let conn = Connection::open_in_memory().unwrap();
        rebuild_table(
            &conn,
            &Rebuild {
                table: "widget",
                definition: "owner TEXT NOT NULL",
                indices: &[WIDGET_INDEX],
                copy: RowCopy {
                    into: "owner",
                    select: "owner",
                    tail: "",
                },
            },
        )
        .unwrap();
        assert_eq!(count(&conn, "widget"), 0);
        assert!(schema::index_exists(&conn, "widget_owner_index").unwrap());
    }

    #[test]
    fn rename_aside_clears_stale_temp() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE widget (owner TEXT);
             CREATE TABLE widget_temp (junk TEXT);",
        )
        .unwrap();
        let temp = rename_aside(&conn, "widget", &[]).unwrap();
        assert_eq!(temp, "widget_temp");
        assert!(schema::column_exists(&conn, "widget_temp", "owner").unwrap());
        assert!(!schema::table_exists(&conn, "widget").unwrap());
    }
}
