use async_trait::async_trait;
use std::sync::Arc;

use crate::afterimage::{
    collaborators::RecoveryStore,
    database::{Database, recovered_messages::RecoveredRecord},
    error::CollaboratorError,
};

/// [`RecoveryStore`] backed by the local SQLite database
#[derive(Clone, Debug)]
pub struct SqliteRecoveryStore {
    database: Arc<Database>,
}

impl SqliteRecoveryStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl RecoveryStore for SqliteRecoveryStore {
    async fn append(&self, record: &RecoveredRecord) -> Result<i64, CollaboratorError> {
        let id = record.create(&self.database).await?;
        tracing::debug!(
            target: "afterimage::persistence::append",
            "Stored recovered message {} from {} in {}",
            id,
            record.sender,
            record.chat
        );
        Ok(id)
    }
}
