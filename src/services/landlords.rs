use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::models::{LandlordProfile, User};
use crate::domain::{AccountStatus, PageRequest, Paginated, UserType};
use crate::error::{AppError, AppResult};

use super::users::get_user;
use super::write_tx;

/// Landlord upgrade request as submitted by the user. Image fields are URLs that
/// are copied to the media store before anything is stored.
#[derive(Debug, Clone, Deserialize)]
pub struct LandlordApplication {
    pub business_name: String,
    pub business_address: String,
    pub business_contact: String,
    pub id_image_url: String,
    pub permit_image_urls: Vec<String>,
}

impl LandlordApplication {
    pub fn validate(&self) -> AppResult<()> {
        let required = [
            ("business_name", &self.business_name),
            ("business_address", &self.business_address),
            ("business_contact", &self.business_contact),
            ("id_image_url", &self.id_image_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AppError::bad_request(format!("{field} is required")));
            }
        }
        if self.permit_image_urls.iter().all(|u| u.trim().is_empty()) {
            return Err(AppError::bad_request(
                "At least one business permit image is required",
            ));
        }
        Ok(())
    }
}

/// Durable URLs returned by the media store for an application.
#[derive(Debug, Clone)]
pub struct UploadedDocuments {
    pub id_url: String,
    pub permit_urls: Vec<String>,
}

fn ensure_can_apply(user: &User) -> AppResult<()> {
    if user.account_status == AccountStatus::Deleted {
        return Err(AppError::forbidden("Account has been deleted"));
    }
    if user.user_type == UserType::Landlord {
        return Err(AppError::conflict("User is already a landlord"));
    }
    if user.account_status == AccountStatus::Pending {
        return Err(AppError::conflict("An application is already pending"));
    }
    Ok(())
}

/// Checked before uploading so a doomed application does no external work.
pub fn check_can_apply(conn: &Connection, subject: &str) -> AppResult<()> {
    ensure_can_apply(&get_user(conn, subject)?)
}

/// Inserts the profile and moves the user to Pending in one transaction.
pub fn submit_application(
    conn: &mut Connection,
    subject: &str,
    application: &LandlordApplication,
    documents: &UploadedDocuments,
) -> AppResult<LandlordProfile> {
    let tx = write_tx(conn)?;
    ensure_can_apply(&get_user(&tx, subject)?)?;

    let permits = serde_json::to_string(&documents.permit_urls)?;
    tx.execute(
        "INSERT INTO landlord_profiles (subject, business_name, business_address,
            business_contact, business_permit_urls, verification_id_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            subject,
            application.business_name.trim(),
            application.business_address.trim(),
            application.business_contact.trim(),
            permits,
            documents.id_url,
            Utc::now()
        ],
    )?;
    let profile_id = tx.last_insert_rowid();
    tx.execute(
        "UPDATE users SET account_status = ?1 WHERE subject = ?2",
        params![AccountStatus::Pending, subject],
    )?;
    let profile = tx.query_row(
        &format!(
            "SELECT {} FROM landlord_profiles WHERE id = ?1",
            LandlordProfile::COLUMNS
        ),
        params![profile_id],
        LandlordProfile::from_row,
    )?;
    tx.commit()?;

    tracing::info!("Landlord application {} submitted by {}", profile_id, subject);
    Ok(profile)
}

pub fn latest_profile(conn: &Connection, subject: &str) -> AppResult<Option<LandlordProfile>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM landlord_profiles WHERE subject = ?1 ORDER BY id DESC LIMIT 1",
                LandlordProfile::COLUMNS
            ),
            params![subject],
            LandlordProfile::from_row,
        )
        .optional()?)
}

/// Approves the latest application: the user becomes a Verified Landlord.
pub fn verify_landlord(conn: &mut Connection, subject: &str, now: DateTime<Utc>) -> AppResult<User> {
    let tx = write_tx(conn)?;
    let user = get_user(&tx, subject)?;
    let profile = latest_profile(&tx, subject)?
        .ok_or_else(|| AppError::not_found("No landlord application found"))?;

    if profile
        .rejection_reason
        .as_deref()
        .is_some_and(|r| !r.is_empty())
    {
        return Err(AppError::conflict("Landlord application was rejected"));
    }
    if user.is_verified_landlord() {
        return Err(AppError::conflict("User is already a verified landlord"));
    }

    tx.execute(
        "UPDATE users SET user_type = ?1, account_status = ?2 WHERE subject = ?3",
        params![UserType::Landlord, AccountStatus::Verified, subject],
    )?;
    tx.execute(
        "UPDATE landlord_profiles
         SET rejection_reason = NULL, rejected_at = NULL, verified_at = ?1
         WHERE id = ?2",
        params![now, profile.id],
    )?;
    let user = get_user(&tx, subject)?;
    tx.commit()?;

    tracing::info!("Verified landlord {}", subject);
    Ok(user)
}

/// Rejects the latest pending application; the applicant stays a Tenant. A verified
/// landlord is not rejected here since their listings need an owner.
pub fn reject_landlord(
    conn: &mut Connection,
    subject: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> AppResult<User> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("A rejection reason is required"));
    }

    let tx = write_tx(conn)?;
    get_user(&tx, subject)?;
    let profile = latest_profile(&tx, subject)?
        .ok_or_else(|| AppError::not_found("No landlord application found"))?;
    if profile.is_rejected() {
        return Err(AppError::conflict("Landlord application is already rejected"));
    }
    if profile.verified_at.is_some() {
        return Err(AppError::conflict("Landlord application is already verified"));
    }

    tx.execute(
        "UPDATE users SET account_status = ?1, user_type = ?2 WHERE subject = ?3",
        params![AccountStatus::Unverified, UserType::Tenant, subject],
    )?;
    tx.execute(
        "UPDATE landlord_profiles
         SET rejection_reason = ?1, rejected_at = ?2, verified_at = NULL
         WHERE id = ?3",
        params![reason, now, profile.id],
    )?;
    let user = get_user(&tx, subject)?;
    tx.commit()?;

    tracing::info!("Rejected landlord application of {}", subject);
    Ok(user)
}

#[derive(Debug, Serialize)]
pub struct ApplicationView {
    #[serde(flatten)]
    pub profile: LandlordProfile,
    pub email: String,
    pub fullname: Option<String>,
}

/// Applications that are neither verified nor rejected, oldest first.
pub fn pending_applications(conn: &Connection, page: PageRequest) -> AppResult<Paginated<ApplicationView>> {
    const PENDING: &str = "p.verified_at IS NULL AND p.rejected_at IS NULL";

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM landlord_profiles p WHERE {PENDING}"),
        [],
        |row| row.get(0),
    )?;
    let window = page.resolve(total);

    let columns = LandlordProfile::COLUMNS
        .split(", ")
        .map(|c| format!("p.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {columns}, u.email, u.fullname
         FROM landlord_profiles p JOIN users u ON u.subject = p.subject
         WHERE {PENDING}
         ORDER BY p.created_at ASC, p.id ASC
         LIMIT ?1 OFFSET ?2"
    ))?;
    let items = stmt
        .query_map(params![window.limit, window.offset], |row| {
            Ok(ApplicationView {
                profile: LandlordProfile::from_row(row)?,
                email: row.get(11)?,
                fullname: row.get(12)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated::new(window, total, items))
}
