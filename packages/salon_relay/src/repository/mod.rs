// Repository layer: SQLite write-through storage for conversations.

use sqlx::sqlite::SqlitePool;

mod conversations;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct ConversationRepository {
    pub(crate) pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
