// src/routes/dashboard.rs

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::db::models::{Campaign, CampaignStatus, EmailLog, EmailStatus};
use crate::error::ApiResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(get_dashboard_stats))
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_contacts: i64,
    pub total_templates: i64,
    pub total_campaigns: i64,
    pub active_campaigns: i64,
    pub total_emails_sent: i64,
    pub emails_sent_today: i64,
    pub recent_campaigns: Vec<Campaign>,
    pub recent_emails: Vec<EmailLog>,
}

pub async fn get_dashboard_stats(
    State(state): State<AppState>,
) -> ApiResult<Json<DashboardStats>> {
    let total_contacts = count(&state, "SELECT COUNT(*) FROM contacts").await?;
    let total_templates = count(&state, "SELECT COUNT(*) FROM templates").await?;
    let total_campaigns = count(&state, "SELECT COUNT(*) FROM campaigns").await?;

    let active_campaigns =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM campaigns WHERE status = $1")
            .bind(CampaignStatus::InProgress.as_str())
            .fetch_one(&state.db)
            .await?;

    let total_emails_sent =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM email_logs WHERE status = $1")
            .bind(EmailStatus::Sent.as_str())
            .fetch_one(&state.db)
            .await?;

    let emails_sent_today = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM email_logs
        WHERE status = $1
          AND sent_at >= date_trunc('day', NOW())
        "#,
    )
    .bind(EmailStatus::Sent.as_str())
    .fetch_one(&state.db)
    .await?;

    let recent_campaigns = sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, name, template_id, contact_ids, description, status,
               scheduled_at, started_at, completed_at, total_emails, sent_count,
               failed_count, created_at, updated_at
        FROM campaigns
        ORDER BY created_at DESC
        LIMIT 5
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let recent_emails = sqlx::query_as::<_, EmailLog>(
        r#"
        SELECT id, campaign_id, contact_id, template_id, subject, body, status,
               sent_at, error_message, created_at
        FROM email_logs
        ORDER BY created_at DESC
        LIMIT 10
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(DashboardStats {
        total_contacts,
        total_templates,
        total_campaigns,
        active_campaigns,
        total_emails_sent,
        emails_sent_today,
        recent_campaigns,
        recent_emails,
    }))
}

async fn count(state: &AppState, sql: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(sql).fetch_one(&state.db).await
}
