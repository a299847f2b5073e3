use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password::CredentialStore,
        repo::UserRepo,
        repo_types::{NewUser, PublicUser, Role, User, UserChanges},
    },
    error::{AppError, AppResult},
    patients::{
        dto::{AssignPatientRequest, CreatePatientRequest, PatientSummary, UpdatePatientRequest},
        repo::PatientRepo,
    },
};

const PATIENT_NOT_FOUND: &str = "Patient not found";

/// Doctor-side management of linked patients.
#[derive(Clone)]
pub struct PatientsService {
    users: Arc<dyn UserRepo>,
    links: Arc<dyn PatientRepo>,
    credentials: Arc<dyn CredentialStore>,
}

impl PatientsService {
    pub fn new(
        users: Arc<dyn UserRepo>,
        links: Arc<dyn PatientRepo>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            users,
            links,
            credentials,
        }
    }

    async fn linked(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<User> {
        self.links
            .find_linked(doctor_id, patient_id)
            .await?
            .ok_or_else(|| {
                warn!(%doctor_id, %patient_id, "patient not linked");
                AppError::not_found(PATIENT_NOT_FOUND)
            })
    }

    /// Creates a PATIENT account already linked to the doctor.
    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn create_patient(
        &self,
        doctor_id: Uuid,
        mut req: CreatePatientRequest,
    ) -> AppResult<PublicUser> {
        req.validate()?;
        if self.users.find_by_email(&req.email).await?.is_some() {
            return Err(AppError::conflict("Email already registered"));
        }

        let password_hash = self.credentials.hash(&req.password)?;
        let user = self
            .users
            .create(NewUser {
                email: req.email,
                password_hash,
                name: req.name.trim().to_string(),
                role: Role::Patient,
                phone: req.phone.filter(|p| !p.trim().is_empty()),
                doctor_id: Some(doctor_id),
            })
            .await?;
        info!(patient_id = %user.id, "patient created");
        Ok(user.into())
    }

    pub async fn list_patients(&self, doctor_id: Uuid) -> AppResult<Vec<PatientSummary>> {
        let rows = self.links.list_linked(doctor_id).await?;
        Ok(rows.into_iter().map(PatientSummary::from).collect())
    }

    pub async fn get_patient(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<PublicUser> {
        self.linked(doctor_id, patient_id).await.map(PublicUser::from)
    }

    #[instrument(skip(self, req))]
    pub async fn update_patient(
        &self,
        doctor_id: Uuid,
        patient_id: Uuid,
        mut req: UpdatePatientRequest,
    ) -> AppResult<PublicUser> {
        req.validate()?;
        self.linked(doctor_id, patient_id).await?;

        if let Some(email) = &req.email {
            if let Some(other) = self.users.find_by_email(email).await? {
                if other.id != patient_id {
                    return Err(AppError::conflict("Email already in use"));
                }
            }
        }

        let changes = UserChanges {
            email: req.email,
            name: req.name.map(|n| n.trim().to_string()),
            phone: req.phone.map(|p| Some(p).filter(|p| !p.trim().is_empty())),
            ..Default::default()
        };
        let user = self.users.update(patient_id, changes).await?;
        info!(%patient_id, "patient updated");
        Ok(user.into())
    }

    /// Removes the patient account entirely, with their plans and tokens.
    #[instrument(skip(self))]
    pub async fn delete_patient(&self, doctor_id: Uuid, patient_id: Uuid) -> AppResult<()> {
        self.linked(doctor_id, patient_id).await?;
        self.users.delete(patient_id).await?;
        info!(%patient_id, "patient deleted");
        Ok(())
    }

    /// Links an existing PATIENT account by email. Linking twice is harmless.
    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn assign_patient(
        &self,
        doctor_id: Uuid,
        mut req: AssignPatientRequest,
    ) -> AppResult<PublicUser> {
        req.validate()?;
        let patient = match self.users.find_by_email(&req.email).await? {
            Some(u) if u.role == Role::Patient => u,
            _ => {
                warn!("assign target missing or not a patient");
                return Err(AppError::not_found(PATIENT_NOT_FOUND));
            }
        };
        self.links.link(doctor_id, patient.id).await?;
        info!(patient_id = %patient.id, "patient assigned");
        Ok(patient.into())
    }
}
