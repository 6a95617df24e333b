use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::routes::state::AppState;
use crate::error::StaffbookError;
use crate::migration::{FieldWithImpact, NewField, RenamePreview, SchemaUpdateResponse};
use crate::schema::FieldDefinition;

/// Request body for PUT /api/fields
#[derive(Debug, Deserialize)]
pub struct UpdateFieldsRequest {
    pub fields: Vec<FieldDefinition>,
}

/// Query parameters for GET /api/fields/rename-preview
#[derive(Debug, Deserialize)]
pub struct RenamePreviewQuery {
    pub field_id: String,
    pub new_field_name: String,
}

/// Runs file-bound coordinator work off the async executor.
async fn run_blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StaffbookError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StaffbookError::Error(format!("Blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// GET /api/fields
/// Returns the schema, each field annotated with its reference counts
pub async fn get_fields(
    State(state): State<AppState>,
) -> Result<Json<Vec<FieldWithImpact>>, ApiError> {
    let coordinator = state.coordinator.clone();
    run_blocking(move || coordinator.schema_with_impact())
        .await
        .map(Json)
}

/// GET /api/fields/columns
pub async fn get_columns(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let coordinator = state.coordinator.clone();
    run_blocking(move || coordinator.columns()).await.map(Json)
}

/// GET /api/fields/rename-preview?field_id=..&new_field_name=..
pub async fn get_rename_preview(
    State(state): State<AppState>,
    query: Result<Query<RenamePreviewQuery>, QueryRejection>,
) -> Result<Json<RenamePreview>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let coordinator = state.coordinator.clone();
    run_blocking(move || coordinator.preview_rename(&query.field_id, &query.new_field_name))
        .await
        .map(Json)
}

/// PUT /api/fields
/// Replaces the schema with the submitted field list and migrates every store
pub async fn update_fields(
    State(state): State<AppState>,
    payload: Result<Json<UpdateFieldsRequest>, JsonRejection>,
) -> Result<Json<SchemaUpdateResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        log::warn!("Rejected schema update body: {}", rejection.body_text());
        ApiError::bad_request(rejection.body_text())
    })?;

    let coordinator = state.coordinator.clone();
    run_blocking(move || coordinator.update_schema(request.fields))
        .await
        .map(Json)
}

/// POST /api/fields
/// Adds a field with a freshly allocated id at the end of the order
pub async fn add_field(
    State(state): State<AppState>,
    payload: Result<Json<NewField>, JsonRejection>,
) -> Result<(StatusCode, Json<SchemaUpdateResponse>), ApiError> {
    let Json(new_field) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    let coordinator = state.coordinator.clone();
    let response = run_blocking(move || coordinator.add_field(new_field)).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
