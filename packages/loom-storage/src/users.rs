use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, error::is_unique_violation, models::UserRow};

pub async fn create_user<'e, E>(
	executor: E,
	handle: &str,
	display_name: Option<&str>,
	now: OffsetDateTime,
) -> Result<UserRow>
where
	E: PgExecutor<'e>,
{
	let user_id = Uuid::new_v4();
	let result = sqlx::query_as::<_, UserRow>(
		"\
INSERT INTO users (user_id, handle, display_name, created_at)
VALUES ($1, $2, $3, $4)
RETURNING user_id, handle, display_name, created_at",
	)
	.bind(user_id)
	.bind(handle)
	.bind(display_name)
	.bind(now)
	.fetch_one(executor)
	.await;

	match result {
		Ok(row) => Ok(row),
		Err(err) if is_unique_violation(&err) =>
			Err(Error::InvalidArgument(format!("Handle {handle:?} is already taken."))),
		Err(err) => Err(err.into()),
	}
}

pub async fn get_user<'e, E>(executor: E, user_id: Uuid) -> Result<UserRow>
where
	E: PgExecutor<'e>,
{
	sqlx::query_as::<_, UserRow>(
		"SELECT user_id, handle, display_name, created_at FROM users WHERE user_id = $1",
	)
	.bind(user_id)
	.fetch_optional(executor)
	.await?
	.ok_or_else(|| Error::NotFound("User not found.".to_string()))
}
