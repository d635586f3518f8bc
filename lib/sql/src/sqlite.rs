use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::SQLError;
use crate::traits::{Row, SQLStore, Statement, Value};

/// SqliteStore is a SQLStore implementation backed by rusqlite (bundled SQLite).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self, SQLError> {
        let conn = Connection::open(path).map_err(|e| SQLError::Connection(e.to_string()))?;

        // Enable WAL mode for better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| SQLError::Connection(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self, SQLError> {
        let conn = Connection::open_in_memory().map_err(|e| SQLError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Convert our Value enum to rusqlite's ToSql.
fn bind_params(params: &[Value]) -> Vec<Box<dyn rusqlite::types::ToSql + '_>> {
    params
        .iter()
        .map(|v| -> Box<dyn rusqlite::types::ToSql + '_> {
            match v {
                Value::Null => Box::new(rusqlite::types::Null),
                Value::Integer(i) => Box::new(*i),
                Value::Real(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.as_str()),
                Value::Blob(b) => Box::new(b.as_slice()),
            }
        })
        .collect()
}

impl SQLStore for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                let mut columns = Vec::new();
                for (i, name) in column_names.iter().enumerate() {
                    let val = row_value_at(row, i);
                    columns.push((name.clone(), val));
                }
                Ok(Row { columns })
            })
            .map_err(|e| SQLError::Query(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(|e| SQLError::Query(e.to_string()))?);
        }
        Ok(result)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        let affected = conn
            .execute(sql, param_refs.as_slice())
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        Ok(affected as u64)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<i64, SQLError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let bound = bind_params(params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();

        conn.execute(sql, param_refs.as_slice())
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn exec_batch(&self, statements: &[Statement]) -> Result<u64, SQLError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let tx = conn
            .transaction()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let mut affected = 0u64;
        for statement in statements {
            let bound = bind_params(&statement.params);
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                bound.iter().map(|b| b.as_ref()).collect();
            // The transaction rolls back on drop if any statement fails.
            affected += tx
                .execute(&statement.sql, param_refs.as_slice())
                .map_err(|e| SQLError::Execution(e.to_string()))?
                as u64;
        }

        tx.commit().map_err(|e| SQLError::Execution(e.to_string()))?;
        Ok(affected)
    }

    fn insert_batch(
        &self,
        first: &Statement,
        rest: &dyn Fn(i64) -> Vec<Statement>,
    ) -> Result<i64, SQLError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let tx = conn
            .transaction()
            .map_err(|e| SQLError::Execution(e.to_string()))?;

        let bound = bind_params(&first.params);
        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            bound.iter().map(|b| b.as_ref()).collect();
        tx.execute(&first.sql, param_refs.as_slice())
            .map_err(|e| SQLError::Execution(e.to_string()))?;
        let id = tx.last_insert_rowid();

        for statement in rest(id) {
            let bound = bind_params(&statement.params);
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                bound.iter().map(|b| b.as_ref()).collect();
            tx.execute(&statement.sql, param_refs.as_slice())
                .map_err(|e| SQLError::Execution(e.to_string()))?;
        }

        tx.commit().map_err(|e| SQLError::Execution(e.to_string()))?;
        Ok(id)
    }
}

/// Extract a Value from a rusqlite row at a given column index.
fn row_value_at(row: &rusqlite::Row, idx: usize) -> Value {
    // Try integer first, then real, then text, then blob, then null.
    if let Ok(i) = row.get::<_, i64>(idx) {
        return Value::Integer(i);
    }
    if let Ok(f) = row.get::<_, f64>(idx) {
        return Value::Real(f);
    }
    if let Ok(s) = row.get::<_, String>(idx) {
        return Value::Text(s);
    }
    if let Ok(b) = row.get::<_, Vec<u8>>(idx) {
        return Value::Blob(b);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .exec(
                "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
                &[],
            )
            .unwrap();
        store
    }

    #[test]
    fn insert_returns_rowid() {
        let store = test_store();
        let id1 = store
            .insert("INSERT INTO t (name) VALUES (?1)", &[Value::Text("a".into())])
            .unwrap();
        let id2 = store
            .insert("INSERT INTO t (name) VALUES (?1)", &[Value::Text("b".into())])
            .unwrap();
        assert!(id2 > id1);

        let rows = store.query("SELECT name FROM t WHERE id = ?1", &[Value::Integer(id1)]).unwrap();
        assert_eq!(rows[0].get_str("name"), Some("a"));
    }

    #[test]
    fn exec_batch_commits_all() {
        let store = test_store();
        let affected = store
            .exec_batch(&[
                Statement::new("INSERT INTO t (name) VALUES (?1)", vec![Value::Text("a".into())]),
                Statement::new("INSERT INTO t (name) VALUES (?1)", vec![Value::Text("b".into())]),
                Statement::new("UPDATE t SET name = 'c'", vec![]),
            ])
            .unwrap();
        assert_eq!(affected, 4);

        let rows = store.query("SELECT COUNT(*) AS cnt FROM t WHERE name = 'c'", &[]).unwrap();
        assert_eq!(rows[0].get_i64("cnt"), Some(2));
    }

    #[test]
    fn insert_batch_feeds_the_rowid_to_followups() {
        let store = test_store();
        store
            .exec("CREATE TABLE child (parent INTEGER NOT NULL)", &[])
            .unwrap();

        let id = store
            .insert_batch(
                &Statement::new("INSERT INTO t (name) VALUES (?1)", vec![Value::Text("a".into())]),
                &|id| {
                    vec![Statement::new(
                        "INSERT INTO child (parent) VALUES (?1)",
                        vec![Value::Integer(id)],
                    )]
                },
            )
            .unwrap();

        let rows = store
            .query("SELECT parent FROM child", &[])
            .unwrap();
        assert_eq!(rows[0].get_i64("parent"), Some(id));
    }

    #[test]
    fn insert_batch_rolls_back_the_insert_on_followup_error() {
        let store = test_store();
        let result = store.insert_batch(
            &Statement::new("INSERT INTO t (name) VALUES (?1)", vec![Value::Text("a".into())]),
            &|_| vec![Statement::new("INSERT INTO missing (x) VALUES (1)", vec![])],
        );
        assert!(result.is_err());

        let rows = store.query("SELECT COUNT(*) AS cnt FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_i64("cnt"), Some(0));
    }

    #[test]
    fn exec_batch_rolls_back_on_error() {
        let store = test_store();
        let result = store.exec_batch(&[
            Statement::new("INSERT INTO t (name) VALUES (?1)", vec![Value::Text("a".into())]),
            Statement::new("INSERT INTO missing (name) VALUES (?1)", vec![Value::Text("b".into())]),
        ]);
        assert!(result.is_err());

        let rows = store.query("SELECT COUNT(*) AS cnt FROM t", &[]).unwrap();
        assert_eq!(rows[0].get_i64("cnt"), Some(0));
    }
}
