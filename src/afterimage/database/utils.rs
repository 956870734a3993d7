use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::Row;

/// Parses a timestamp column stored either as INTEGER milliseconds or as a
/// SQLite TEXT datetime (`CURRENT_TIMESTAMP` defaults produce the latter).
pub(crate) fn parse_timestamp<'r, R>(
    row: &'r R,
    column_name: &'r str,
) -> Result<DateTime<Utc>, sqlx::Error>
where
    R: Row,
    &'r str: sqlx::ColumnIndex<R>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    if let Ok(timestamp_ms) = row.try_get::<i64, _>(column_name) {
        return DateTime::from_timestamp_millis(timestamp_ms)
            .ok_or_else(|| column_decode_error(column_name, "Invalid timestamp value"));
    }

    if let Ok(datetime_str) = row.try_get::<String, _>(column_name) {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&datetime_str) {
            return Ok(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(&datetime_str, format) {
                return Ok(naive.and_utc());
            }
        }
        return Err(column_decode_error(
            column_name,
            &format!("Could not parse datetime string: '{datetime_str}'"),
        ));
    }

    Err(column_decode_error(
        column_name,
        "Could not parse as INTEGER or DATETIME",
    ))
}

pub(crate) fn column_decode_error(column_name: &str, message: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column_name.to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            message.to_string(),
        )),
    }
}
