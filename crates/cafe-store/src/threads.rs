use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::CafeClientThread;

impl Database {
    /// Insert or replace the snapshot for `(thread.id, thread.client)`.
    pub fn upsert_cafe_client_thread(&self, thread: &CafeClientThread) -> Result<()> {
        self.conn().execute(
            "INSERT INTO cafe_client_threads (id, client, ciphertext, updated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id, client) DO UPDATE SET
                ciphertext = excluded.ciphertext,
                updated = excluded.updated",
            params![
                thread.id,
                thread.client,
                thread.ciphertext,
                thread.updated.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(())
    }

    /// Returns whether a record was removed; a missing key is not an error.
    pub fn delete_cafe_client_thread(&self, id: &str, client: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM cafe_client_threads WHERE id = ?1 AND client = ?2",
            params![id, client],
        )?;
        Ok(affected > 0)
    }

    pub fn list_cafe_client_threads(&self, client: &str) -> Result<Vec<CafeClientThread>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, client, ciphertext, updated
             FROM cafe_client_threads
             WHERE client = ?1
             ORDER BY updated DESC",
        )?;

        let rows = stmt.query_map(params![client], row_to_thread)?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(row?);
        }
        Ok(threads)
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<CafeClientThread> {
    let id: String = row.get(0)?;
    let client: String = row.get(1)?;
    let ciphertext: Vec<u8> = row.get(2)?;
    let updated_str: String = row.get(3)?;

    let updated: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CafeClientThread {
        id,
        client,
        ciphertext,
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str, client: &str, ciphertext: &[u8]) -> CafeClientThread {
        CafeClientThread {
            id: id.to_string(),
            client: client.to_string(),
            ciphertext: ciphertext.to_vec(),
            updated: Utc::now(),
        }
    }

    fn ciphertext_of(db: &Database, id: &str, client: &str) -> Option<Vec<u8>> {
        db.list_cafe_client_threads(client)
            .unwrap()
            .into_iter()
            .find(|t| t.id == id)
            .map(|t| t.ciphertext)
    }

    #[test]
    fn upsert_replaces_ciphertext() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cafe_client_thread(&snapshot("t1", "c1", b"first")).unwrap();
        db.upsert_cafe_client_thread(&snapshot("t1", "c1", b"second, longer"))
            .unwrap();

        let threads = db.list_cafe_client_threads("c1").unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].ciphertext, b"second, longer");
    }

    #[test]
    fn same_thread_different_clients() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cafe_client_thread(&snapshot("t1", "c1", b"a")).unwrap();
        db.upsert_cafe_client_thread(&snapshot("t1", "c2", b"b")).unwrap();

        assert_eq!(ciphertext_of(&db, "t1", "c1").unwrap(), b"a");
        assert_eq!(ciphertext_of(&db, "t1", "c2").unwrap(), b"b");
    }

    #[test]
    fn delete_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cafe_client_thread(&snapshot("t1", "c1", b"x")).unwrap();

        assert!(db.delete_cafe_client_thread("t1", "c1").unwrap());
        assert!(!db.delete_cafe_client_thread("t1", "c1").unwrap());
        assert!(ciphertext_of(&db, "t1", "c1").is_none());
    }

    #[test]
    fn empty_ciphertext_is_stored() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_cafe_client_thread(&snapshot("t1", "c1", b"")).unwrap();
        assert!(ciphertext_of(&db, "t1", "c1").unwrap().is_empty());
    }
}
