use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    users::model::PublicUser,
    validation::{normalize_email, Violations},
};

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn normalize_and_validate(&mut self) -> AppResult<()> {
        self.email = normalize_email(&self.email);
        let mut v = Violations::new();
        v.email("email", &self.email);
        v.required("password", &self.password);
        v.into_result()
    }
}

/// Response returned after register or login.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: PublicUser,
}
