//! Tenant audit log writes

use sqlx::PgPool;

/// Write an audit log entry
pub async fn log(
    pool: &PgPool,
    restaurant_id: i64,
    action: &str,
    detail: Option<&serde_json::Value>,
    actor: Option<&str>,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_logs (restaurant_id, action, detail, actor, created_at) VALUES ($1, $2, $3, $4, $5)"
    )
    .bind(restaurant_id)
    .bind(action)
    .bind(detail)
    .bind(actor)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}
