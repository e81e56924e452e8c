use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::CafeClient;

impl Database {
    pub fn add_cafe_client(&self, client: &CafeClient) -> Result<()> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO cafe_clients (id, address, created) VALUES (?1, ?2, ?3)",
            params![
                client.id,
                client.address,
                client.created.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::Exists);
        }
        Ok(())
    }

    /// Absence is not an error: callers decide what an unknown client means.
    pub fn get_cafe_client(&self, id: &str) -> Result<Option<CafeClient>> {
        let client = self
            .conn()
            .query_row(
                "SELECT id, address, created FROM cafe_clients WHERE id = ?1",
                params![id],
                row_to_client,
            )
            .optional()?;
        Ok(client)
    }

    pub fn count_cafe_clients(&self) -> Result<u64> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM cafe_clients", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<CafeClient> {
    let id: String = row.get(0)?;
    let address: String = row.get(1)?;
    let created_str: String = row.get(2)?;

    let created: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CafeClient {
        id,
        address,
        created,
    })
}
