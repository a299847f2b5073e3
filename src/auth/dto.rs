use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    auth::repo_types::{PublicUser, Role},
    error::{AppError, FieldError},
};

pub(crate) const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Turns collected field errors into a single `Validation` error.
pub(crate) fn finish(errors: Vec<FieldError>) -> Result<(), AppError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    pub phone: Option<String>,
}

impl RegisterRequest {
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

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        self.email = normalize_email(&self.email);
        let mut errors = Vec::new();
        if !is_valid_email(&self.email) {
            errors.push(FieldError::new("email", "Invalid email"));
        }
        if self.password.is_empty() {
            errors.push(FieldError::new("password", "Password is required"));
        }
        finish(errors)
    }
}

/// Request body for token refresh and logout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Partial profile update.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

impl UpdateProfileRequest {
    pub fn validate(&mut self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if let Some(email) = self.email.as_mut() {
            *email = normalize_email(email);
            if !is_valid_email(email) {
                errors.push(FieldError::new("email", "Invalid email"));
            }
        }
        if let Some(name) = &self.name {
            if name.trim().len() < 2 {
                errors.push(FieldError::new("name", "Name must be at least 2 characters"));
            }
        }
        if let Some(pw) = &self.password {
            if !pw.trim().is_empty() && pw.len() < MIN_PASSWORD_LEN {
                errors.push(FieldError::new(
                    "password",
                    "Password must be at least 8 characters",
                ));
            }
        }
        finish(errors)
    }
}

/// Response returned after login or register.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}
