// src/routes/templates.rs

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::models::Template;
use crate::error::{ApiError, ApiResult};
use crate::template;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_template).get(list_templates))
        .route(
            "/{template_id}",
            get(get_template)
                .put(update_template)
                .delete(delete_template),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    pub subject: String,
    pub content: String,
    pub description: Option<String>,
    #[serde(default)]
    pub use_llm: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplate {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub use_llm: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

const TEMPLATE_COLUMNS: &str =
    "id, name, subject, content, description, placeholders, use_llm, created_at, updated_at";

pub async fn create_template(
    State(state): State<AppState>,
    Json(tpl): Json<CreateTemplate>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    // Placeholder list is always derived from the content, never hand-edited.
    let placeholders = template::extract(&tpl.content);

    let created = sqlx::query_as::<_, Template>(&format!(
        r#"
        INSERT INTO templates (name, subject, content, description, placeholders, use_llm)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {TEMPLATE_COLUMNS}
        "#,
    ))
    .bind(&tpl.name)
    .bind(&tpl.subject)
    .bind(&tpl.content)
    .bind(&tpl.description)
    .bind(&placeholders)
    .bind(tpl.use_llm)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Template>>> {
    let templates = sqlx::query_as::<_, Template>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS}
        FROM templates
        ORDER BY created_at DESC
        OFFSET $1
        LIMIT $2
        "#,
    ))
    .bind(params.skip)
    .bind(params.limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(templates))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<Json<Template>> {
    let tpl = fetch_template(&state, template_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Template not found".to_string()))?;

    Ok(Json(tpl))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(update): Json<UpdateTemplate>,
) -> ApiResult<Json<Template>> {
    let existing = fetch_template(&state, template_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Template not found".to_string()))?;

    let content_changed = update.content.is_some();

    let name = update.name.unwrap_or(existing.name);
    let subject = update.subject.unwrap_or(existing.subject);
    let content = update.content.unwrap_or(existing.content);
    let description = update.description.or(existing.description);
    let use_llm = update.use_llm.unwrap_or(existing.use_llm);

    let placeholders = if content_changed {
        template::extract(&content)
    } else {
        existing.placeholders
    };

    let updated = sqlx::query_as::<_, Template>(&format!(
        r#"
        UPDATE templates
        SET name = $2,
            subject = $3,
            content = $4,
            description = $5,
            placeholders = $6,
            use_llm = $7,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {TEMPLATE_COLUMNS}
        "#,
    ))
    .bind(template_id)
    .bind(&name)
    .bind(&subject)
    .bind(&content)
    .bind(&description)
    .bind(&placeholders)
    .bind(use_llm)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM templates WHERE id = $1")
        .bind(template_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Template not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_template(
    state: &AppState,
    template_id: Uuid,
) -> Result<Option<Template>, sqlx::Error> {
    sqlx::query_as::<_, Template>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS}
        FROM templates
        WHERE id = $1
        "#,
    ))
    .bind(template_id)
    .fetch_optional(&state.db)
    .await
}
