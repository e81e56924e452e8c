use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::CafeClientMessage;

impl Database {
    /// Insert an inbox entry, or refresh `peer`/`date` when the same
    /// envelope was already queued for this client.
    pub fn upsert_cafe_client_message(&self, message: &CafeClientMessage) -> Result<()> {
        self.conn().execute(
            "INSERT INTO cafe_client_messages (id, peer, client, date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id, client) DO UPDATE SET
                peer = excluded.peer,
                date = excluded.date",
            params![
                message.id,
                message.peer,
                message.client,
                message.date.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ],
        )?;
        Ok(())
    }

    /// Inbox entries for a client, oldest first.
    pub fn list_cafe_client_messages(&self, client: &str) -> Result<Vec<CafeClientMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, peer, client, date
             FROM cafe_client_messages
             WHERE client = ?1
             ORDER BY date ASC",
        )?;

        let rows = stmt.query_map(params![client], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<CafeClientMessage> {
    let id: String = row.get(0)?;
    let peer: String = row.get(1)?;
    let client: String = row.get(2)?;
    let date_str: String = row.get(3)?;

    let date: DateTime<Utc> = DateTime::parse_from_rfc3339(&date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(CafeClientMessage {
        id,
        peer,
        client,
        date,
    })
}
