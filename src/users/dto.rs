use serde::{Deserialize, Serialize};

use super::model::{PublicUser, Role, UserPatch};
use crate::{
    error::AppResult,
    validation::{normalize_email, Violations},
};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Body for registration and admin user creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl CreateUserRequest {
    /// Trims and lowercases the email, then checks field rules.
    pub fn normalize_and_validate(&mut self) -> AppResult<()> {
        self.username = self.username.trim().to_string();
        self.email = normalize_email(&self.email);
        self.first_name = self.first_name.trim().to_string();
        self.last_name = self.last_name.trim().to_string();

        let mut v = Violations::new();
        v.length("username", &self.username, 3, 20);
        v.email("email", &self.email);
        v.min_length("password", &self.password, 6);
        v.length("first_name", &self.first_name, 1, 50);
        v.length("last_name", &self.last_name, 1, 50);
        v.into_result()
    }
}

/// Partial update: absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl UpdateUserRequest {
    pub fn into_patch(self) -> AppResult<UserPatch> {
        let username = self.username.map(|s| s.trim().to_string());
        let email = self.email.map(|s| normalize_email(&s));
        let first_name = self.first_name.map(|s| s.trim().to_string());
        let last_name = self.last_name.map(|s| s.trim().to_string());

        let mut v = Violations::new();
        if let Some(u) = &username {
            v.length("username", u, 3, 20);
        }
        if let Some(e) = &email {
            v.email("email", e);
        }
        if let Some(f) = &first_name {
            v.length("first_name", f, 1, 50);
        }
        if let Some(l) = &last_name {
            v.length("last_name", l, 1, 50);
        }
        v.into_result()?;

        Ok(UserPatch {
            username,
            email,
            first_name,
            last_name,
            role: self.role,
            is_active: self.is_active,
        })
    }
}

/// Raw `?page=&limit=` query; bad values fall back to defaults instead of failing.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListParams {
    pub fn resolve(&self) -> (u32, u32) {
        fn parse(v: Option<&str>, default: u32) -> u32 {
            v.and_then(|s| s.trim().parse::<u32>().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(default)
        }
        let page = parse(self.page.as_deref(), DEFAULT_PAGE);
        let limit = parse(self.limit.as_deref(), DEFAULT_LIMIT).min(MAX_LIMIT);
        (page, limit)
    }
}

#[derive(Debug, Serialize)]
pub struct PagedUsers {
    pub users: Vec<PublicUser>,
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl PagedUsers {
    pub fn new(users: Vec<PublicUser>, total_count: u64, page: u32, limit: u32) -> Self {
        let total_pages = total_count.div_ceil(u64::from(limit.max(1)));
        Self {
            users,
            total_count,
            page,
            limit,
            total_pages,
        }
    }
}
