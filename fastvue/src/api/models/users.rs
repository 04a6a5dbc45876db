//! API request/response models for users.

use crate::db::models::users::UserDBResponse;
use crate::errors::{Error, FieldError};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PASSWORD_MIN_LENGTH: usize = 8;
pub const PASSWORD_MAX_LENGTH: usize = 40;
pub const EMAIL_MAX_LENGTH: usize = 255;
pub const FULL_NAME_MAX_LENGTH: usize = 255;

// User request models

/// Created by a superuser; may set the account flags directly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

/// Unauthenticated creation, used by the private routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegister {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

impl UserUpdate {
    /// Whether this update touches anything only a superuser may change
    pub fn changes_flags(&self) -> bool {
        self.is_active.is_some() || self.is_superuser.is_some()
    }
}

fn default_true() -> bool {
    true
}

// User response models

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            full_name: db.full_name,
            is_active: db.is_active,
            is_superuser: db.is_superuser,
            is_verified: db.is_verified,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// A page of users plus the total count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersResponse {
    pub data: Vec<UserResponse>,
    pub count: i64,
}

/// The authenticated caller, as resolved from the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub is_superuser: bool,
}

impl From<UserDBResponse> for CurrentUser {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            full_name: db.full_name,
            is_active: db.is_active,
            is_superuser: db.is_superuser,
        }
    }
}

// Validation

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.') && !domain.contains('@')
        }
        None => false,
    };

    if !well_formed || email.chars().any(char::is_whitespace) {
        errors.push(FieldError::new("email", "value is not a valid email address", "value_error"));
    } else if email.len() > EMAIL_MAX_LENGTH {
        errors.push(FieldError::new(
            "email",
            format!("String should have at most {EMAIL_MAX_LENGTH} characters"),
            "string_too_long",
        ));
    }
}

fn check_password(password: &str, errors: &mut Vec<FieldError>) {
    let length = password.chars().count();
    if length < PASSWORD_MIN_LENGTH {
        errors.push(FieldError::new(
            "password",
            format!("String should have at least {PASSWORD_MIN_LENGTH} characters"),
            "string_too_short",
        ));
    } else if length > PASSWORD_MAX_LENGTH {
        errors.push(FieldError::new(
            "password",
            format!("String should have at most {PASSWORD_MAX_LENGTH} characters"),
            "string_too_long",
        ));
    }
}

fn check_full_name(full_name: Option<&str>, errors: &mut Vec<FieldError>) {
    if full_name.is_some_and(|name| name.chars().count() > FULL_NAME_MAX_LENGTH) {
        errors.push(FieldError::new(
            "full_name",
            format!("String should have at most {FULL_NAME_MAX_LENGTH} characters"),
            "string_too_long",
        ));
    }
}

fn into_result(errors: Vec<FieldError>) -> Result<(), Error> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation {
            message: "Validation failed".to_string(),
            errors,
        })
    }
}

impl UserCreate {
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        check_password(&self.password, &mut errors);
        check_full_name(self.full_name.as_deref(), &mut errors);
        into_result(errors)
    }
}

impl UserRegister {
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        check_email(&self.email, &mut errors);
        check_password(&self.password, &mut errors);
        check_full_name(self.full_name.as_deref(), &mut errors);
        into_result(errors)
    }
}

impl UserUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        if let Some(email) = &self.email {
            check_email(email, &mut errors);
        }
        if let Some(password) = &self.password {
            check_password(password, &mut errors);
        }
        check_full_name(self.full_name.as_deref(), &mut errors);
        into_result(errors)
    }
}
