//! Role and ownership checks run before any plan or patient mutation.
//!
//! Missing credentials are rejected earlier by the `AuthUser` extractor as
//! `Unauthorized`; everything here answers `Forbidden`. Patient linkage is not
//! checked here: an unlinked patient is reported as `NotFound` by the
//! patient lookups themselves.

use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::repo_types::{Identity, Role},
    error::{AppError, AppResult},
    plans::repo_types::MealPlan,
};

pub fn require_role(identity: &Identity, role: Role) -> AppResult<()> {
    if identity.role != role {
        warn!(user_id = %identity.id, have = ?identity.role, need = ?role, "role mismatch");
        return Err(AppError::forbidden(
            "You do not have permission to perform this action",
        ));
    }
    Ok(())
}

/// Readers of a plan: its owning doctor and its subject patient.
pub fn ensure_can_view(plan: &MealPlan, requester_id: Uuid, role: Role) -> AppResult<()> {
    let allowed = match role {
        Role::Doctor => plan.doctor_id == requester_id,
        Role::Patient => plan.patient_id == requester_id,
    };
    if !allowed {
        warn!(plan_id = %plan.id, %requester_id, ?role, "plan access denied");
        return Err(AppError::forbidden("You do not have access to this plan"));
    }
    Ok(())
}

/// Only the owning doctor may mutate a plan.
pub fn ensure_owner(plan: &MealPlan, doctor_id: Uuid) -> AppResult<()> {
    if plan.doctor_id != doctor_id {
        warn!(plan_id = %plan.id, %doctor_id, "plan mutation denied");
        return Err(AppError::forbidden(
            "You do not have permission to modify this plan",
        ));
    }
    Ok(())
}
