use axum::{
    extract::State,
    routing::{get, post, put},
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::{AuthUser, DoctorUser, PatientUser},
    error::AppResult,
    extract::{Json, Path},
    plans::dto::{
        AddMealRequest, CreatePlanRequest, DoctorStats, PatientStats, PlanDetails,
        UpdateMealRequest, UpdatePlanRequest,
    },
    response::ApiResponse,
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans).post(create_plan))
        .route("/plans/stats/doctor", get(doctor_stats))
        .route("/plans/stats/patient", get(patient_stats))
        .route(
            "/plans/:id",
            get(get_plan).put(update_plan).delete(delete_plan),
        )
        .route("/plans/:id/meals", post(add_meal))
        .route("/plans/:id/meals/:meal_id", put(update_meal).delete(delete_meal))
}

/// GET /plans — owned plans for doctors, assigned plans for patients
#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list_plans(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<ApiResponse<Vec<PlanDetails>>> {
    Ok(ApiResponse::ok(state.plans.list_plans(&user).await?))
}

#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn create_plan(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Json(payload): Json<CreatePlanRequest>,
) -> AppResult<ApiResponse<PlanDetails>> {
    let plan = state.plans.create_plan(doctor.id, payload).await?;
    Ok(ApiResponse::created(plan).with_message("Meal plan created successfully"))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_plan(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<PlanDetails>> {
    Ok(ApiResponse::ok(state.plans.get_plan(id, &user).await?))
}

#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn update_plan(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePlanRequest>,
) -> AppResult<ApiResponse<PlanDetails>> {
    let plan = state.plans.update_plan(id, doctor.id, payload).await?;
    Ok(ApiResponse::ok(plan).with_message("Meal plan updated successfully"))
}

#[instrument(skip(state, doctor), fields(doctor_id = %doctor.id))]
pub async fn delete_plan(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<()>> {
    state.plans.delete_plan(id, doctor.id).await?;
    Ok(ApiResponse::message("Meal plan deleted successfully"))
}

/// POST /plans/:id/meals
#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn add_meal(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddMealRequest>,
) -> AppResult<ApiResponse<PlanDetails>> {
    let plan = state.plans.add_meal(id, doctor.id, payload).await?;
    Ok(ApiResponse::created(plan).with_message("Meal added successfully"))
}

#[instrument(skip(state, doctor, payload), fields(doctor_id = %doctor.id))]
pub async fn update_meal(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path((id, meal_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateMealRequest>,
) -> AppResult<ApiResponse<PlanDetails>> {
    let plan = state
        .plans
        .update_meal(id, meal_id, doctor.id, payload)
        .await?;
    Ok(ApiResponse::ok(plan).with_message("Meal updated successfully"))
}

#[instrument(skip(state, doctor), fields(doctor_id = %doctor.id))]
pub async fn delete_meal(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
    Path((id, meal_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<PlanDetails>> {
    let plan = state.plans.delete_meal(id, meal_id, doctor.id).await?;
    Ok(ApiResponse::ok(plan).with_message("Meal deleted successfully"))
}

#[instrument(skip(state, doctor), fields(doctor_id = %doctor.id))]
pub async fn doctor_stats(
    State(state): State<AppState>,
    DoctorUser(doctor): DoctorUser,
) -> AppResult<ApiResponse<DoctorStats>> {
    Ok(ApiResponse::ok(state.plans.doctor_stats(doctor.id).await?))
}

#[instrument(skip(state, patient), fields(patient_id = %patient.id))]
pub async fn patient_stats(
    State(state): State<AppState>,
    PatientUser(patient): PatientUser,
) -> AppResult<ApiResponse<PatientStats>> {
    Ok(ApiResponse::ok(state.plans.patient_stats(patient.id).await?))
}
