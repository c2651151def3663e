use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::{
    enquiry::{CreateEnquiryRequest, Enquiry, EnquiryStatus, UpdateEnquiryRequest},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiMessage, ApiOk, ApiPage, AppState, PageRequest},
    store::{EnquiryFilter, StoreError},
    validation::{FieldErrors, optional_enum},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_enquiries).post(create_enquiry))
        .route(
            "/{id}",
            get(get_enquiry)
                .put(update_enquiry)
                .patch(update_enquiry)
                .delete(delete_enquiry),
        )
}

/// An enquiry as returned to clients: `patient_id` mirrors the conversion link.
#[derive(Debug, Serialize)]
pub struct EnquiryView {
    #[serde(flatten)]
    pub enquiry: Enquiry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<i64>,
}

impl From<Enquiry> for EnquiryView {
    fn from(enquiry: Enquiry) -> Self {
        let patient_id = enquiry.converted_to_patient_id;
        Self { enquiry, patient_id }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEnquiriesQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

pub async fn list_enquiries(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListEnquiriesQuery>,
) -> Result<Json<ApiPage<EnquiryView>>, ApiError> {
    let mut errors = FieldErrors::new();
    let status: Option<EnquiryStatus> = optional_enum(&mut errors, "status", q.status.as_deref(), EnquiryStatus::ALL);
    errors.into_result()?;

    let page = PageRequest::from_query(q.page, q.per_page);
    let (rows, total) = state
        .store
        .list_enquiries(&EnquiryFilter { status }, page.limit(), page.offset())
        .await?;

    let data = rows.into_iter().map(EnquiryView::from).collect();
    Ok(Json(ApiPage::new(data, page, total)))
}

pub async fn get_enquiry(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<ApiOk<EnquiryView>>, ApiError> {
    let enquiry = state
        .store
        .get_enquiry(id)
        .await?
        .ok_or(StoreError::NotFound("enquiry"))?;
    Ok(Json(ApiOk::new(enquiry.into())))
}

pub async fn create_enquiry(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateEnquiryRequest>,
) -> Result<(StatusCode, Json<ApiOk<EnquiryView>>), ApiError> {
    let new = req.validate()?;
    let enquiry = state.store.create_enquiry(new, Some(auth.user_id)).await?;

    tracing::info!(enquiry_id = enquiry.id, created_by = auth.user_id, "enquiry created");
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::with_message(enquiry.into(), "Enquiry created successfully")),
    ))
}

/// Field update; moving the status to `converted` promotes the enquiry to a patient.
pub async fn update_enquiry(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateEnquiryRequest>,
) -> Result<Json<ApiOk<EnquiryView>>, ApiError> {
    let changes = req.validate()?;
    let outcome = state.conversion.update_enquiry(id, &changes).await?;
    Ok(Json(ApiOk::with_message(
        outcome.enquiry.into(),
        "Enquiry updated successfully",
    )))
}

pub async fn delete_enquiry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> Result<Json<ApiMessage>, ApiError> {
    state.store.soft_delete_enquiry(id).await?;
    tracing::info!(enquiry_id = id, deleted_by = auth.user_id, "enquiry deleted");
    Ok(Json(ApiMessage::new("Enquiry deleted successfully")))
}
