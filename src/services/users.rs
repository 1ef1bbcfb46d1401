use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::models::User;
use crate::db::is_unique_violation;
use crate::domain::{
    AccountStatus, PageRequest, Paginated, UserType, SOFT_DELETE_TTL_DAYS,
};
use crate::error::{AppError, AppResult};
use crate::external::{IdentityProfile, VerifiedIdentity};

use super::write_tx;

pub fn find_by_subject(conn: &Connection, subject: &str) -> AppResult<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE subject = ?1", User::COLUMNS),
            params![subject],
            User::from_row,
        )
        .optional()?)
}

pub fn get_user(conn: &Connection, subject: &str) -> AppResult<User> {
    find_by_subject(conn, subject)?.ok_or_else(|| AppError::not_found("User not found"))
}

/// Inserts a Tenant/Unverified account for a first-time identity. A concurrent
/// provision of the same subject resolves to the row that won.
pub fn provision(
    conn: &Connection,
    identity: &VerifiedIdentity,
    profile: &IdentityProfile,
) -> AppResult<User> {
    let inserted = conn.execute(
        "INSERT INTO users (subject, email, phone, fullname, photo_url, provider,
            account_status, user_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            identity.subject,
            identity.email,
            profile.phone,
            profile.display_name,
            profile.photo_url,
            profile.provider,
            AccountStatus::Unverified,
            UserType::Tenant,
            Utc::now()
        ],
    );

    match inserted {
        Ok(_) => {
            tracing::info!("Provisioned user {}", identity.subject);
        }
        Err(e) if is_unique_violation(&e) => {
            if let Some(user) = find_by_subject(conn, &identity.subject)? {
                return Ok(user);
            }
            return Err(AppError::conflict("Email is already registered to another account"));
        }
        Err(e) => return Err(e.into()),
    }
    get_user(conn, &identity.subject)
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    pub phone: Option<String>,
    pub address: Option<String>,
    pub fullname: Option<String>,
    /// `YYYY-MM-DD`
    pub birthday: Option<String>,
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.address.is_none()
            && self.fullname.is_none()
            && self.birthday.is_none()
            && self.photo_url.is_none()
    }

    pub fn parsed_birthday(&self) -> AppResult<Option<NaiveDate>> {
        self.birthday
            .as_deref()
            .map(|b| {
                NaiveDate::parse_from_str(b.trim(), "%Y-%m-%d")
                    .map_err(|_| AppError::bad_request("birthday must be formatted YYYY-MM-DD"))
            })
            .transpose()
    }
}

/// Only the provided fields change. `photo_url` must already be a durable URL.
pub fn update_profile(conn: &Connection, subject: &str, update: &ProfileUpdate) -> AppResult<User> {
    if update.is_empty() {
        return Err(AppError::bad_request("At least one field must be provided"));
    }
    let birthday = update.parsed_birthday()?;

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref phone) = update.phone {
        sets.push("phone");
        values.push(phone);
    }
    if let Some(ref address) = update.address {
        sets.push("address");
        values.push(address);
    }
    if let Some(ref fullname) = update.fullname {
        sets.push("fullname");
        values.push(fullname);
    }
    if let Some(ref birthday) = birthday {
        sets.push("birthday");
        values.push(birthday);
    }
    if let Some(ref photo_url) = update.photo_url {
        sets.push("photo_url");
        values.push(photo_url);
    }

    let assignments = sets
        .iter()
        .enumerate()
        .map(|(i, col)| format!("{col} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    values.push(&subject);
    let sql = format!(
        "UPDATE users SET {assignments} WHERE subject = ?{} AND account_status != 'Deleted'",
        values.len()
    );

    let changed = conn.execute(&sql, values.as_slice())?;
    if changed == 0 {
        return Err(AppError::not_found("User not found"));
    }
    get_user(conn, subject)
}

pub fn set_push_token(conn: &Connection, subject: &str, token: &str) -> AppResult<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::bad_request("token is required"));
    }
    let changed = conn.execute(
        "UPDATE users SET push_token = ?1 WHERE subject = ?2",
        params![token, subject],
    )?;
    if changed == 0 {
        return Err(AppError::not_found("User not found"));
    }
    Ok(())
}

pub fn fullname(conn: &Connection, subject: &str) -> AppResult<Option<String>> {
    Ok(get_user(conn, subject)?.fullname)
}

pub fn role(conn: &Connection, subject: &str) -> AppResult<UserType> {
    Ok(get_user(conn, subject)?.user_type)
}

/// Loads the caller and fails with 403 unless they are a verified landlord.
pub fn require_verified_landlord(conn: &Connection, subject: &str) -> AppResult<User> {
    let user = find_by_subject(conn, subject)?
        .ok_or_else(|| AppError::forbidden("Only verified landlords may do this"))?;
    if !user.is_verified_landlord() {
        return Err(AppError::forbidden("Only verified landlords may do this"));
    }
    Ok(user)
}

// -- Tenant verification --

fn ensure_can_submit(status: AccountStatus) -> AppResult<()> {
    match status {
        AccountStatus::Unverified | AccountStatus::Rejected => Ok(()),
        AccountStatus::Pending => Err(AppError::conflict("Verification is already pending")),
        AccountStatus::Verified => Err(AppError::conflict("Account is already verified")),
        AccountStatus::Deleted => Err(AppError::forbidden("Account has been deleted")),
    }
}

/// Checked before the ID is uploaded so a doomed request does no external work.
pub fn check_can_submit_verification(conn: &Connection, subject: &str) -> AppResult<()> {
    ensure_can_submit(get_user(conn, subject)?.account_status)
}

/// `Unverified | Rejected → Pending`, storing the uploaded ID.
pub fn submit_verification(conn: &mut Connection, subject: &str, valid_id_url: &str) -> AppResult<User> {
    let tx = write_tx(conn)?;
    ensure_can_submit(get_user(&tx, subject)?.account_status)?;
    tx.execute(
        "UPDATE users SET valid_id_url = ?1, account_status = ?2 WHERE subject = ?3",
        params![valid_id_url, AccountStatus::Pending, subject],
    )?;
    let user = get_user(&tx, subject)?;
    tx.commit()?;
    Ok(user)
}

/// Admin decision on a pending tenant verification.
pub fn decide_verification(conn: &mut Connection, subject: &str, approve: bool) -> AppResult<User> {
    let tx = write_tx(conn)?;
    let user = get_user(&tx, subject)?;
    if user.account_status != AccountStatus::Pending {
        return Err(AppError::conflict(format!(
            "Account is {}, not Pending",
            user.account_status
        )));
    }
    let next = if approve {
        AccountStatus::Verified
    } else {
        AccountStatus::Rejected
    };
    tx.execute(
        "UPDATE users SET account_status = ?1 WHERE subject = ?2",
        params![next, subject],
    )?;
    let user = get_user(&tx, subject)?;
    tx.commit()?;
    Ok(user)
}

// -- Soft delete --

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftDeleteOutcome {
    pub expires_at: DateTime<Utc>,
    pub apartments: usize,
    pub inquiries: usize,
}

/// Marks the user Deleted and, in the same transaction, their apartments Deleted and
/// every inquiry they are party to (as tenant or as owner of the apartment) Rejected,
/// all stamped with the same expiry. Re-running on a deleted user changes nothing.
pub fn soft_delete(conn: &mut Connection, subject: &str, now: DateTime<Utc>) -> AppResult<SoftDeleteOutcome> {
    let tx = write_tx(conn)?;
    let user = get_user(&tx, subject)?;
    if let (AccountStatus::Deleted, Some(expires_at)) = (user.account_status, user.expires_at) {
        return Ok(SoftDeleteOutcome {
            expires_at,
            apartments: 0,
            inquiries: 0,
        });
    }

    let expires_at = now + Duration::days(SOFT_DELETE_TTL_DAYS);
    tx.execute(
        "UPDATE users SET account_status = 'Deleted', expires_at = ?1, push_token = NULL
         WHERE subject = ?2",
        params![expires_at, subject],
    )?;
    let apartments = tx.execute(
        "UPDATE apartments SET status = 'Deleted', expires_at = ?1 WHERE owner_subject = ?2",
        params![expires_at, subject],
    )?;
    let inquiries = tx.execute(
        "UPDATE inquiries SET status = 'Rejected', expires_at = ?1
         WHERE tenant_subject = ?2
            OR apartment_id IN (SELECT id FROM apartments WHERE owner_subject = ?2)",
        params![expires_at, subject],
    )?;
    tx.commit()?;

    tracing::info!(
        "Soft-deleted user {} ({} apartments, {} inquiries)",
        subject,
        apartments,
        inquiries
    );
    Ok(SoftDeleteOutcome {
        expires_at,
        apartments,
        inquiries,
    })
}

// -- Admin listing --

#[derive(Debug, Default, Deserialize)]
pub struct UserFilter {
    pub status: Option<AccountStatus>,
    pub user_type: Option<UserType>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub fn list_users(conn: &Connection, filter: &UserFilter) -> AppResult<Paginated<User>> {
    let mut clauses = Vec::new();
    let mut values: Vec<&dyn ToSql> = Vec::new();
    if let Some(ref status) = filter.status {
        values.push(status);
        clauses.push(format!("account_status = ?{}", values.len()));
    }
    if let Some(ref user_type) = filter.user_type {
        values.push(user_type);
        clauses.push(format!("user_type = ?{}", values.len()));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM users {where_sql}"),
        values.as_slice(),
        |row| row.get(0),
    )?;
    let window = PageRequest {
        page: filter.page,
        limit: filter.limit,
    }
    .resolve(total);

    let sql = format!(
        "SELECT {} FROM users {where_sql} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        User::COLUMNS,
        values.len() + 1,
        values.len() + 2
    );
    values.push(&window.limit);
    values.push(&window.offset);
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(values.as_slice(), User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated::new(window, total, users))
}
