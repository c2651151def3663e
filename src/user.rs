// src/user.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{FieldErrors, check_len, clean, is_valid_email};

/// Groups a user may belong to. `admin` and `superadmin` unlock user management.
pub const KNOWN_GROUPS: &[&str] = &["superadmin", "admin", "developer", "user", "beta"];
pub const ADMIN_GROUPS: &[&str] = &["superadmin", "admin"];

pub fn is_admin(groups: &[String]) -> bool {
    groups.iter().any(|g| ADMIN_GROUPS.contains(&g.as_str()))
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub active: bool,
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A user row together with its stored password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// A resolved, unexpired, unrevoked access token.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token_id: Uuid,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub groups: Vec<String>,
}

/// Changed-fields-only update; `password_hash` is already hashed.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub active: Option<bool>,
    pub groups: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    pub group: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub active: Option<bool>,
    pub group: Option<String>,
}

fn validate_username(errors: &mut FieldErrors, username: &str) -> Option<String> {
    let Some(u) = clean(Some(username)) else {
        errors.add("username", "username is required");
        return None;
    };
    check_len(errors, "username", &u, 3, 30);
    Some(u)
}

fn validate_email(errors: &mut FieldErrors, email: &str) -> Option<String> {
    let Some(e) = clean(Some(email)) else {
        errors.add("email", "email is required");
        return None;
    };
    if !is_valid_email(&e) {
        errors.add("email", "Please provide a valid email address");
    }
    Some(e.to_lowercase())
}

fn validate_password(errors: &mut FieldErrors, pw: &str) {
    if pw.trim().chars().count() < 8 {
        errors.add("password", "password must be at least 8 characters");
    }
}

fn validate_group(errors: &mut FieldErrors, group: &str) -> Option<String> {
    let g = group.trim();
    if KNOWN_GROUPS.contains(&g) {
        Some(g.to_string())
    } else {
        errors.add("group", format!("group must be one of: {}", KNOWN_GROUPS.join(", ")));
        None
    }
}

/// Validated create request; the password is still plain text here.
#[derive(Debug, Clone)]
pub struct ValidCreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub groups: Vec<String>,
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<ValidCreateUser, FieldErrors> {
        let mut errors = FieldErrors::new();
        let username = validate_username(&mut errors, &self.username);
        let email = validate_email(&mut errors, &self.email);
        validate_password(&mut errors, &self.password);
        let groups: Vec<String> = self
            .group
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .and_then(|g| validate_group(&mut errors, g))
            .into_iter()
            .collect();

        match (username, email) {
            (Some(username), Some(email)) if errors.is_empty() => Ok(ValidCreateUser {
                username,
                email,
                password: self.password.trim().to_string(),
                groups,
            }),
            _ => Err(errors),
        }
    }
}

/// Validated update request; `password` still plain text.
#[derive(Debug, Clone, Default)]
pub struct ValidUpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub active: Option<bool>,
    pub groups: Option<Vec<String>>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<ValidUpdateUser, FieldErrors> {
        let mut errors = FieldErrors::new();
        let username = self.username.as_deref().and_then(|u| validate_username(&mut errors, u));
        let email = self.email.as_deref().and_then(|e| validate_email(&mut errors, e));
        // empty password means "leave unchanged"
        let password = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| {
                validate_password(&mut errors, p);
                p.trim().to_string()
            });
        let groups = self.group.as_deref().map(|g| {
            if g.trim().is_empty() {
                Vec::new()
            } else {
                validate_group(&mut errors, g).into_iter().collect()
            }
        });

        errors.into_result()?;
        Ok(ValidUpdateUser {
            username,
            email,
            password,
            active: self.active,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        let mut errors = FieldErrors::new();
        assert!(validate_username(&mut errors, "alice").is_some());
        assert!(errors.is_empty());

        let mut errors = FieldErrors::new();
        validate_username(&mut errors, "al");
        assert!(errors.contains("username"));

        let mut errors = FieldErrors::new();
        assert!(validate_username(&mut errors, "  ").is_none());
        assert!(errors.contains("username"));
    }

    #[test]
    fn test_validate_password() {
        let mut errors = FieldErrors::new();
        validate_password(&mut errors, "password123");
        assert!(errors.is_empty());

        let mut errors = FieldErrors::new();
        validate_password(&mut errors, "short");
        assert!(errors.contains("password"));
    }

    #[test]
    fn test_create_user_normalizes_email_and_checks_group() {
        let req = CreateUserRequest {
            username: "frontdesk".into(),
            email: "FrontDesk@CPC.in".into(),
            password: "longenough".into(),
            group: Some("admin".into()),
        };
        let valid = req.validate().unwrap();
        assert_eq!(valid.email, "frontdesk@cpc.in");
        assert_eq!(valid.groups, vec!["admin".to_string()]);

        let req = CreateUserRequest {
            group: Some("root".into()),
            ..req
        };
        assert!(req.validate().unwrap_err().contains("group"));
    }

    #[test]
    fn test_update_blank_password_is_ignored() {
        let req = UpdateUserRequest {
            password: Some(String::new()),
            active: Some(false),
            ..Default::default()
        };
        let valid = req.validate().unwrap();
        assert!(valid.password.is_none());
        assert_eq!(valid.active, Some(false));
    }

    #[test]
    fn test_is_admin() {
        assert!(is_admin(&["user".into(), "admin".into()]));
        assert!(is_admin(&["superadmin".into()]));
        assert!(!is_admin(&["user".into()]));
        assert!(!is_admin(&[]));
    }
}
