//! User directory shown to signed-in callers, e.g. when picking an assignee.

use sqlx::PgPool;

use collab_db::models::User;
use collab_db::queries::users as user_db;

use crate::error::ProjectResult;

/// All registered users, ordered by name.
pub async fn list_users(pool: &PgPool) -> ProjectResult<Vec<User>> {
    Ok(user_db::list_users(pool).await?)
}
