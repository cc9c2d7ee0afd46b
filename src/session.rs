use crate::db;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("a user with email {0} already exists")]
    DuplicateEmail(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "bad_params",
            Self::DuplicateEmail(_) => "conflict",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Hash(_) => "password_hash_failed",
            Self::Storage(_) => "db_query_failed",
        }
    }
}

/// The logged-in user recorded on resource mutations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

/// argon2id PHC string; salt and parameters travel inside it.
fn hash_password(password: &str) -> Result<String, SessionError> {
    use argon2::Argon2;
    use password_hash::rand_core::OsRng;
    use password_hash::{PasswordHasher, SaltString};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| SessionError::Hash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::Argon2;
    use password_hash::{PasswordHash, PasswordVerifier};

    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn normalize_email(email: &str) -> Result<String, SessionError> {
    let email = email.trim().to_ascii_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(SessionError::InvalidInput("email is not valid".into()));
    }
    Ok(email)
}

pub fn create_user(
    conn: &Connection,
    email: &str,
    name: Option<&str>,
    password: &str,
) -> Result<SessionUser, SessionError> {
    let email = normalize_email(email)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SessionError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| r.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(SessionError::DuplicateEmail(email));
    }

    let id = Uuid::new_v4().to_string();
    let name = name.map(str::trim).filter(|s| !s.is_empty());
    let password_hash = hash_password(password)?;
    conn.execute(
        "INSERT INTO users(id, email, name, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &email, name, &password_hash, db::now_rfc3339()),
    )?;
    Ok(SessionUser {
        id,
        email,
        name: name.map(|s| s.to_string()),
    })
}

pub fn login(conn: &Connection, email: &str, password: &str) -> Result<SessionUser, SessionError> {
    let email = normalize_email(email).map_err(|_| SessionError::InvalidCredentials)?;
    let row: Option<(String, Option<String>, String)> = conn
        .query_row(
            "SELECT id, name, password_hash FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((id, name, stored)) = row else {
        return Err(SessionError::InvalidCredentials);
    };
    if !verify_password(password, &stored) {
        return Err(SessionError::InvalidCredentials);
    }
    Ok(SessionUser { id, email, name })
}
