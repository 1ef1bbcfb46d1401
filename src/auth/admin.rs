use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::conflict_on_unique;
use crate::db::models::Admin;
use crate::error::{AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(password, cost).map_err(|e| AppError::Internal(format!("bcrypt: {e}")))
}

pub fn admin_exists(conn: &Connection) -> AppResult<bool> {
    Ok(conn.query_row("SELECT EXISTS(SELECT 1 FROM admins)", [], |row| row.get(0))?)
}

pub fn find_by_email(conn: &Connection, email: &str) -> AppResult<Option<Admin>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM admins WHERE email = ?1", Admin::COLUMNS),
            params![email],
            Admin::from_row,
        )
        .optional()?)
}

pub fn create_admin(conn: &Connection, email: &str, password: &str, cost: u32) -> AppResult<Admin> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("A valid email is required"));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let hash = hash_password(password, cost)?;
    conn.execute(
        "INSERT INTO admins (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![email, hash, Utc::now()],
    )
    .map_err(conflict_on_unique("Admin already exists"))?;

    find_by_email(conn, &email)?
        .ok_or_else(|| AppError::Internal("admin vanished after insert".into()))
}

/// Checks the password against the stored bcrypt hash. Unknown emails and wrong
/// passwords produce the same error.
pub fn authenticate(conn: &Connection, email: &str, password: &str) -> AppResult<Admin> {
    let invalid = || AppError::Unauthorized("Invalid email or password".into());
    let admin = find_by_email(conn, &email.trim().to_lowercase())?.ok_or_else(invalid)?;
    match bcrypt::verify(password, &admin.password_hash) {
        Ok(true) => Ok(admin),
        Ok(false) => Err(invalid()),
        Err(e) => {
            tracing::warn!("Unreadable password hash for admin {}: {}", admin.id, e);
            Err(invalid())
        }
    }
}

/// Session subject used for administrator tokens.
pub fn session_subject(admin: &Admin) -> String {
    format!("admin:{}", admin.id)
}
