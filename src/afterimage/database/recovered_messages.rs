use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{Database, DatabaseError, utils::parse_timestamp};

/// The durable artifact of one processed deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredRecord {
    /// Row id, `None` until the record has been stored
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub chat: String,
    /// Wire name of the effective content kind (e.g. `videoMessage`)
    pub content_kind: String,
    pub text_content: Option<String>,
    pub media_path: Option<PathBuf>,
    /// Whether the message was posted to the status broadcast
    pub is_status: bool,
}

/// Internal database row representation for the recovered_messages table
#[derive(Debug)]
struct RecoveredRecordRow {
    id: i64,
    timestamp: DateTime<Utc>,
    sender: String,
    chat: String,
    content_kind: String,
    text_content: Option<String>,
    media_path: Option<String>,
    is_status: bool,
}

impl<'r, R> sqlx::FromRow<'r, R> for RecoveredRecordRow
where
    R: sqlx::Row,
    &'r str: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    Option<String>: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    bool: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    fn from_row(row: &'r R) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            timestamp: parse_timestamp(row, "timestamp")?,
            sender: row.try_get("sender")?,
            chat: row.try_get("chat")?,
            content_kind: row.try_get("type")?,
            text_content: row.try_get("text_content")?,
            media_path: row.try_get("media_path")?,
            is_status: row.try_get("is_status")?,
        })
    }
}

impl From<RecoveredRecordRow> for RecoveredRecord {
    fn from(val: RecoveredRecordRow) -> Self {
        Self {
            id: Some(val.id),
            timestamp: val.timestamp,
            sender: val.sender,
            chat: val.chat,
            content_kind: val.content_kind,
            text_content: val.text_content,
            media_path: val.media_path.map(PathBuf::from),
            is_status: val.is_status,
        }
    }
}

impl RecoveredRecord {
    /// Appends this record, returning the new row id.
    ///
    /// The table is append-only; rows are never updated or deleted.
    pub(crate) async fn create(&self, database: &Database) -> Result<i64, DatabaseError> {
        let media_path = self
            .media_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO recovered_messages
                (timestamp, sender, chat, type, text_content, media_path, is_status)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(self.timestamp.timestamp_millis())
        .bind(&self.sender)
        .bind(&self.chat)
        .bind(&self.content_kind)
        .bind(&self.text_content)
        .bind(media_path)
        .bind(self.is_status)
        .fetch_one(&database.pool)
        .await?;

        Ok(id)
    }

    /// All stored records, oldest first
    pub async fn all(database: &Database) -> Result<Vec<Self>, DatabaseError> {
        let rows = sqlx::query_as::<_, RecoveredRecordRow>(
            "SELECT id, timestamp, sender, chat, type, text_content, media_path, is_status
             FROM recovered_messages
             ORDER BY id ASC",
        )
        .fetch_all(&database.pool)
        .await?;

        Ok(rows.into_iter().map(Self::from).collect())
    }

    pub async fn count(database: &Database) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recovered_messages")
            .fetch_one(&database.pool)
            .await?;
        Ok(count)
    }
}
