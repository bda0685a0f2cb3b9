// src/routes/emails.rs

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::{EmailLog, EmailStatus};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_email_logs))
        .route("/{log_id}", get(get_email_log))
        .route("/campaign/{campaign_id}/stats", get(get_campaign_stats))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub campaign_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub status_filter: Option<String>,
    /// Only logs created within the last N days; 0 disables the cutoff.
    #[serde(default = "default_days")]
    pub days: i32,
}

fn default_limit() -> i64 {
    100
}

fn default_days() -> i32 {
    30
}

#[derive(Debug, Serialize)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
    pub success_rate: f64,
}

const LOG_COLUMNS: &str = "id, campaign_id, contact_id, template_id, subject, body, status, \
     sent_at, error_message, created_at";

pub async fn list_email_logs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<EmailLog>>> {
    let logs = sqlx::query_as::<_, EmailLog>(&format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM email_logs
        WHERE ($1::uuid IS NULL OR campaign_id = $1)
          AND ($2::uuid IS NULL OR contact_id = $2)
          AND ($3::text IS NULL OR status = $3)
          AND ($4::int <= 0 OR created_at >= NOW() - make_interval(days => $4))
        ORDER BY created_at DESC
        OFFSET $5
        LIMIT $6
        "#,
    ))
    .bind(params.campaign_id)
    .bind(params.contact_id)
    .bind(&params.status_filter)
    .bind(params.days)
    .bind(params.skip)
    .bind(params.limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(logs))
}

pub async fn get_email_log(
    State(state): State<AppState>,
    Path(log_id): Path<Uuid>,
) -> ApiResult<Json<EmailLog>> {
    let log = sqlx::query_as::<_, EmailLog>(&format!(
        r#"
        SELECT {LOG_COLUMNS}
        FROM email_logs
        WHERE id = $1
        "#,
    ))
    .bind(log_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Email log not found".to_string()))?;

    Ok(Json(log))
}

pub async fn get_campaign_stats(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<Json<CampaignStats>> {
    let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::NotFound("Campaign not found".to_string()));
    }

    let total = count_logs(&state, campaign_id, None).await?;
    let sent = count_logs(&state, campaign_id, Some(EmailStatus::Sent)).await?;
    let failed = count_logs(&state, campaign_id, Some(EmailStatus::Failed)).await?;
    let pending = count_logs(&state, campaign_id, Some(EmailStatus::Pending)).await?;

    let success_rate = if total > 0 {
        sent as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    Ok(Json(CampaignStats {
        campaign_id,
        total,
        sent,
        failed,
        pending,
        success_rate,
    }))
}

async fn count_logs(
    state: &AppState,
    campaign_id: Uuid,
    status: Option<EmailStatus>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM email_logs
        WHERE campaign_id = $1
          AND ($2::text IS NULL OR status = $2)
        "#,
    )
    .bind(campaign_id)
    .bind(status.map(|s| s.as_str()))
    .fetch_one(&state.db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_accept_status_filter_key() {
        let params: ListParams =
            serde_json::from_value(serde_json::json!({ "status_filter": "sent" }))
                .expect("params should deserialize");

        assert_eq!(params.status_filter.as_deref(), Some("sent"));
        assert_eq!(params.days, 30);
        assert_eq!(params.limit, 100);
    }
}
