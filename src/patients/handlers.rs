use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{extractors::DoctorUser, repo_types::PublicUser},
    error::AppResult,
    extract::{Json, Path},
    patients::dto::{
        AssignPatientRequest, CreatePatientRequest, PatientSummary, UpdatePatientRequest,
    },
    response::ApiResponse,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/patients", post(create_patient).get(list_patients))
        .route("/patients/assign", post(assign_patient))
        .route(
            "/patients/:id",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
}

/// POST /patients
#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn create_patient(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Json(payload): Json<CreatePatientRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let patient = state.patients.create_patient(doctor.id, payload).await?;
    Ok(ApiResponse::created(patient).with_message("Patient created successfully"))
}

/// GET /patients
#[instrument(skip(state, doctor), fields(doctor_id = %doctor.id))]
pub async fn list_patients(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
) -> AppResult<ApiResponse<Vec<PatientSummary>>> {
    Ok(ApiResponse::ok(state.patients.list_patients(doctor.id).await?))
}

#[instrument(skip(state, doctor), fields(doctor_id = %doctor.id))]
pub async fn get_patient(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<PublicUser>> {
    Ok(ApiResponse::ok(state.patients.get_patient(doctor.id, id).await?))
}

#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn update_patient(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePatientRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let patient = state.patients.update_patient(doctor.id, id, payload).await?;
    Ok(ApiResponse::ok(patient).with_message("Patient updated successfully"))
}

#[instrument(skip(state, doctor), fields(doctor_id = %doctor.id))]
pub async fn delete_patient(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<()>> {
    state.patients.delete_patient(doctor.id, id).await?;
    Ok(ApiResponse::message("Patient deleted successfully"))
}

/// POST /patients/assign {email}
#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn assign_patient(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Json(payload): Json<AssignPatientRequest>,
) -> AppResult<ApiResponse<PublicUser>> {
    let patient = state.patients.assign_patient(doctor.id, payload).await?;
    Ok(ApiResponse::ok(patient).with_message("Patient assigned successfully"))
}
