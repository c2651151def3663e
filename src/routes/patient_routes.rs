use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiMessage, ApiOk, ApiPage, AppState, PageRequest},
    patient::{CreatePatientRequest, Patient, PatientStatus, UpdatePatientRequest},
    store::{PatientFilter, StoreError},
    validation::{FieldErrors, clean, optional_enum},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_patients).post(create_patient))
        .route(
            "/{id}",
            get(get_patient)
                .put(update_patient)
                .patch(update_patient)
                .delete(delete_patient),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPatientsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListPatientsQuery>,
) -> Result<Json<ApiPage<Patient>>, ApiError> {
    let mut errors = FieldErrors::new();
    let status: Option<PatientStatus> = optional_enum(&mut errors, "status", q.status.as_deref(), PatientStatus::ALL);
    errors.into_result()?;

    let filter = PatientFilter {
        status,
        search: clean(q.search.as_deref()),
    };
    let page = PageRequest::from_query(q.page, q.per_page);
    let (rows, total) = state
        .store
        .list_patients(&filter, page.limit(), page.offset())
        .await?;

    Ok(Json(ApiPage::new(rows, page, total)))
}

#[derive(Debug, Default, Deserialize)]
pub struct GetPatientQuery {
    /// Admins may look up soft-deleted patients (e.g. to trace an old enquiry link).
    #[serde(default)]
    pub with_deleted: bool,
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Query(q): Query<GetPatientQuery>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let patient = if q.with_deleted {
        auth.ensure_admin()?;
        state.store.get_patient_including_deleted(id).await?
    } else {
        state.store.get_patient(id).await?
    };
    let patient = patient.ok_or(StoreError::NotFound("patient"))?;
    Ok(Json(ApiOk::new(patient)))
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<ApiOk<Patient>>), ApiError> {
    let new = req.validate()?;
    let patient = state.store.create_patient(new, Some(auth.user_id)).await?;

    tracing::info!(
        patient_id = patient.id,
        patient_code = %patient.patient_code,
        created_by = auth.user_id,
        "patient created"
    );
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::with_message(patient, "Patient created successfully")),
    ))
}

pub async fn update_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let changes = req.validate()?;
    let patient = state.store.update_patient(id, &changes).await?;
    Ok(Json(ApiOk::with_message(patient, "Patient updated successfully")))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<ApiMessage>, ApiError> {
    state.store.soft_delete_patient(id).await?;
    tracing::info!(patient_id = id, deleted_by = auth.user_id, "patient deleted");
    Ok(Json(ApiMessage::new("Patient deleted successfully")))
}
