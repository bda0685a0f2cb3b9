// src/routes/campaigns.rs

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::models::{Campaign, CampaignStatus};
use crate::error::{ApiError, ApiResult};
use crate::runner;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_campaign).get(list_campaigns))
        .route(
            "/{campaign_id}",
            get(get_campaign)
                .put(update_campaign)
                .delete(delete_campaign),
        )
        .route("/{campaign_id}/send", post(send_campaign))
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaign {
    pub name: String,
    pub template_id: Uuid,
    #[serde(default)]
    pub contact_ids: Vec<Uuid>,
    pub description: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub template_id: Option<Uuid>,
    pub contact_ids: Option<Vec<Uuid>>,
    pub description: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub status_filter: Option<String>,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Default, Deserialize)]
pub struct CampaignSendRequest {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct CampaignSendAck {
    pub message: &'static str,
    pub campaign_id: Uuid,
    pub dry_run: bool,
}

const CAMPAIGN_COLUMNS: &str = "id, name, template_id, contact_ids, description, status, \
     scheduled_at, started_at, completed_at, total_emails, sent_count, failed_count, \
     created_at, updated_at";

pub async fn create_campaign(
    State(state): State<AppState>,
    Json(campaign): Json<CreateCampaign>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    // The template and every referenced contact must exist at creation time.
    // Contacts deleted later are skipped by the runner instead.
    let template_exists =
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM templates WHERE id = $1")
            .bind(campaign.template_id)
            .fetch_optional(&state.db)
            .await?;
    if template_exists.is_none() {
        return Err(ApiError::NotFound("Template not found".to_string()));
    }

    for contact_id in &campaign.contact_ids {
        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM contacts WHERE id = $1")
            .bind(contact_id)
            .fetch_optional(&state.db)
            .await?;
        if exists.is_none() {
            return Err(ApiError::NotFound(format!(
                "Contact {contact_id} not found"
            )));
        }
    }

    let total = campaign.contact_ids.len() as i32;

    let created = sqlx::query_as::<_, Campaign>(&format!(
        r#"
        INSERT INTO campaigns
            (name, template_id, contact_ids, description, scheduled_at, status, total_emails)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {CAMPAIGN_COLUMNS}
        "#,
    ))
    .bind(&campaign.name)
    .bind(campaign.template_id)
    .bind(&campaign.contact_ids)
    .bind(&campaign.description)
    .bind(campaign.scheduled_at)
    .bind(CampaignStatus::Draft.as_str())
    .bind(total)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Campaign>>> {
    let campaigns = sqlx::query_as::<_, Campaign>(&format!(
        r#"
        SELECT {CAMPAIGN_COLUMNS}
        FROM campaigns
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        OFFSET $2
        LIMIT $3
        "#,
    ))
    .bind(&params.status_filter)
    .bind(params.skip)
    .bind(params.limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(campaigns))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<Json<Campaign>> {
    let campaign = fetch_campaign(&state, campaign_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Campaign not found".to_string()))?;

    Ok(Json(campaign))
}

pub async fn update_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(update): Json<UpdateCampaign>,
) -> ApiResult<Json<Campaign>> {
    let existing = fetch_campaign(&state, campaign_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Campaign not found".to_string()))?;

    let editable = existing.status().map(|s| s.editable()).unwrap_or(false);
    if !editable {
        return Err(ApiError::BadRequest(format!(
            "Cannot update campaign with status: {}",
            existing.status
        )));
    }

    let name = update.name.unwrap_or(existing.name);
    let template_id = update.template_id.unwrap_or(existing.template_id);
    let contact_ids = update.contact_ids.unwrap_or(existing.contact_ids);
    let description = update.description.or(existing.description);
    let scheduled_at = update.scheduled_at.or(existing.scheduled_at);
    let status = update
        .status
        .map(|s| s.as_str().to_string())
        .unwrap_or(existing.status);

    // total_emails is fixed by the contact list, never set directly.
    let total = contact_ids.len() as i32;

    let updated = sqlx::query_as::<_, Campaign>(&format!(
        r#"
        UPDATE campaigns
        SET name = $2,
            template_id = $3,
            contact_ids = $4,
            description = $5,
            scheduled_at = $6,
            status = $7,
            total_emails = $8,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {CAMPAIGN_COLUMNS}
        "#,
    ))
    .bind(campaign_id)
    .bind(&name)
    .bind(template_id)
    .bind(&contact_ids)
    .bind(&description)
    .bind(scheduled_at)
    .bind(&status)
    .bind(total)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let campaign = fetch_campaign(&state, campaign_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Campaign not found".to_string()))?;

    if campaign.status() == Some(CampaignStatus::InProgress) {
        return Err(ApiError::BadRequest(
            "Cannot delete campaign that is in progress".to_string(),
        ));
    }

    sqlx::query("DELETE FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Start sending a campaign. The claim is a single atomic check-and-set, so
/// two overlapping send requests cannot both start a run; the loser sees the
/// campaign's current status in the error. The run itself is spawned
/// fire-and-forget and observed by polling the campaign record.
pub async fn send_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(send_request): Json<CampaignSendRequest>,
) -> ApiResult<Json<CampaignSendAck>> {
    let claimed = runner::try_claim_campaign(&state.db, campaign_id).await?;

    let campaign = match claimed {
        Some(campaign) => campaign,
        None => {
            // Either missing or not in a sendable state; report which.
            let current = fetch_campaign(&state, campaign_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Campaign not found".to_string()))?;
            return Err(ApiError::BadRequest(format!(
                "Cannot send campaign with status: {}",
                current.status
            )));
        }
    };

    let dry_run = send_request.dry_run;
    info!("Campaign {} claimed for sending (dry_run={})", campaign_id, dry_run);

    tokio::spawn(runner::run_campaign(
        state.db.clone(),
        state.config.clone(),
        campaign,
        dry_run,
    ));

    Ok(Json(CampaignSendAck {
        message: "Campaign started",
        campaign_id,
        dry_run,
    }))
}

async fn fetch_campaign(
    state: &AppState,
    campaign_id: Uuid,
) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as::<_, Campaign>(&format!(
        r#"
        SELECT {CAMPAIGN_COLUMNS}
        FROM campaigns
        WHERE id = $1
        "#,
    ))
    .bind(campaign_id)
    .fetch_optional(&state.db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_accept_status_filter_key() {
        let params: ListParams =
            serde_json::from_value(serde_json::json!({ "status_filter": "draft" }))
                .expect("params should deserialize");

        assert_eq!(params.status_filter.as_deref(), Some("draft"));
        assert_eq!(params.skip, 0);
        assert_eq!(params.limit, 100);
    }
}
