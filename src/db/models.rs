//! Row types for the admin side of the schema in `migrations/`.
//! Deal rows decode straight into `types::Deal`.

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}
