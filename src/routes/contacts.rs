// src/routes/contacts.rs

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use uuid::Uuid;

use crate::db::models::Contact;
use crate::db::DbPool;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_contact).get(list_contacts))
        .route("/bulk", post(bulk_import_contacts))
        .route(
            "/{contact_id}",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateContact {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateContact {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub custom_fields: Option<HashMap<String, String>>,
    pub tags: Option<Vec<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub active: Option<bool>,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct BulkContactImport {
    pub contacts: Vec<CreateContact>,
}

#[derive(Debug, Serialize)]
pub struct BulkImportResult {
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<BulkImportError>,
}

#[derive(Debug, Serialize)]
pub struct BulkImportError {
    pub email: String,
    pub error: String,
}

async fn find_by_email(pool: &DbPool, email: &str) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM contacts WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

async fn insert_contact(pool: &DbPool, contact: &CreateContact) -> Result<Contact, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        INSERT INTO contacts (email, first_name, last_name, custom_fields, tags, active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, email, first_name, last_name, custom_fields, tags, active,
                  created_at, updated_at
        "#,
    )
    .bind(&contact.email)
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(SqlJson(&contact.custom_fields))
    .bind(&contact.tags)
    .bind(contact.active)
    .fetch_one(pool)
    .await
}

pub async fn create_contact(
    State(state): State<AppState>,
    Json(contact): Json<CreateContact>,
) -> ApiResult<(StatusCode, Json<Contact>)> {
    if find_by_email(&state.db, &contact.email).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "Contact with email {} already exists",
            contact.email
        )));
    }

    let created = insert_contact(&state.db, &contact).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_contacts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Contact>>> {
    let contacts = sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, email, first_name, last_name, custom_fields, tags, active,
               created_at, updated_at
        FROM contacts
        WHERE ($1::boolean IS NULL OR active = $1)
        ORDER BY created_at DESC
        OFFSET $2
        LIMIT $3
        "#,
    )
    .bind(params.active)
    .bind(params.skip)
    .bind(params.limit)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(contacts))
}

pub async fn get_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
) -> ApiResult<Json<Contact>> {
    let contact = sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, email, first_name, last_name, custom_fields, tags, active,
               created_at, updated_at
        FROM contacts
        WHERE id = $1
        "#,
    )
    .bind(contact_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Contact not found".to_string()))?;

    Ok(Json(contact))
}

pub async fn update_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
    Json(update): Json<UpdateContact>,
) -> ApiResult<Json<Contact>> {
    let existing = sqlx::query_as::<_, Contact>(
        r#"
        SELECT id, email, first_name, last_name, custom_fields, tags, active,
               created_at, updated_at
        FROM contacts
        WHERE id = $1
        "#,
    )
    .bind(contact_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Contact not found".to_string()))?;

    // Email uniqueness re-check when the address changes.
    if let Some(email) = &update.email {
        if email != &existing.email && find_by_email(&state.db, email).await?.is_some() {
            return Err(ApiError::Conflict(format!(
                "Contact with email {} already exists",
                email
            )));
        }
    }

    let email = update.email.unwrap_or(existing.email);
    let first_name = update.first_name.or(existing.first_name);
    let last_name = update.last_name.or(existing.last_name);
    let custom_fields = update.custom_fields.unwrap_or(existing.custom_fields.0);
    let tags = update.tags.unwrap_or(existing.tags);
    let active = update.active.unwrap_or(existing.active);

    let updated = sqlx::query_as::<_, Contact>(
        r#"
        UPDATE contacts
        SET email = $2,
            first_name = $3,
            last_name = $4,
            custom_fields = $5,
            tags = $6,
            active = $7,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, email, first_name, last_name, custom_fields, tags, active,
                  created_at, updated_at
        "#,
    )
    .bind(contact_id)
    .bind(&email)
    .bind(&first_name)
    .bind(&last_name)
    .bind(SqlJson(&custom_fields))
    .bind(&tags)
    .bind(active)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(updated))
}

pub async fn delete_contact(
    State(state): State<AppState>,
    Path(contact_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let result = sqlx::query("DELETE FROM contacts WHERE id = $1")
        .bind(contact_id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("Contact not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Create-or-skip per row; a bad row never aborts the rest of the import.
pub async fn bulk_import_contacts(
    State(state): State<AppState>,
    Json(bulk): Json<BulkContactImport>,
) -> ApiResult<(StatusCode, Json<BulkImportResult>)> {
    let mut created = 0;
    let mut skipped = 0;
    let mut errors = Vec::new();

    for contact in &bulk.contacts {
        match find_by_email(&state.db, &contact.email).await {
            Ok(Some(_)) => {
                skipped += 1;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                errors.push(BulkImportError {
                    email: contact.email.clone(),
                    error: err.to_string(),
                });
                continue;
            }
        }

        match insert_contact(&state.db, contact).await {
            Ok(_) => created += 1,
            Err(err) => errors.push(BulkImportError {
                email: contact.email.clone(),
                error: err.to_string(),
            }),
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(BulkImportResult {
            created,
            skipped,
            errors,
        }),
    ))
}
