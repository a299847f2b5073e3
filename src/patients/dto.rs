use serde::{Deserialize, Serialize};

use crate::{
    auth::{
        dto::{finish, is_valid_email, normalize_email, MIN_PASSWORD_LEN},
        repo_types::{PublicUser, User},
    },
    error::{AppError, FieldError},
};

/// A doctor creating a patient account on the patient's behalf.
#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
}

impl CreatePatientRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        self.email = normalize_email(&self.email);
        let mut errors = Vec::new();
        if !is_valid_email(&self.email) {
            errors.push(FieldError::new("email", "Invalid email"));
        }
        if self.password.len() < MIN_PASSWORD_LEN {
            errors.push(FieldError::new(
                "password",
                "Password must be at least 8 characters",
            ));
        }
        if self.name.trim().len() < 2 {
            errors.push(FieldError::new("name", "Name must be at least 2 characters"));
        }
        finish(errors)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl UpdatePatientRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if let Some(email) = self.email.as_mut() {
            *email = normalize_email(email);
            if !is_valid_email(email) {
                errors.push(FieldError::new("email", "Invalid email"));
            }
        }
        if self.name.as_deref().is_some_and(|n| n.trim().len() < 2) {
            errors.push(FieldError::new("name", "Name must be at least 2 characters"));
        }
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct AssignPatientRequest {
    pub email: String,
}

impl AssignPatientRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        self.email = normalize_email(&self.email);
        if is_valid_email(&self.email) {
            Ok(())
        } else {
            finish(vec![FieldError::new("email", "Invalid email")])
        }
    }
}

/// A linked patient as listed to their doctor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    #[serde(flatten)]
    pub user: PublicUser,
    pub plans_count: i64,
}

impl From<(User, i64)> for PatientSummary {
    fn from((user, plans_count): (User, i64)) -> Self {
        Self {
            user: user.into(),
            plans_count,
        }
    }
}
