use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::conflict_on_unique;
use crate::db::models::Inquiry;
use crate::domain::{AccountStatus, ApartmentStatus, InquiryStatus, INQUIRY_TTL_DAYS};
use crate::error::{AppError, AppResult};

use super::{apartments, users, write_tx};

#[derive(Debug, Clone, Deserialize)]
pub struct NewInquiry {
    pub apartment_id: i64,
    #[serde(default)]
    pub message: String,
}

/// An inquiry joined with the listing it refers to.
#[derive(Debug, Clone, Serialize)]
pub struct InquiryView {
    #[serde(flatten)]
    pub inquiry: Inquiry,
    pub property_name: String,
    pub tenant_fullname: Option<String>,
}

const VIEW_SELECT: &str = "SELECT i.id, i.tenant_subject, i.apartment_id, i.message, i.status, \
     i.created_at, i.expires_at, i.notified, a.property_name, u.fullname \
     FROM inquiries i \
     JOIN apartments a ON a.id = i.apartment_id \
     JOIN users u ON u.subject = i.tenant_subject";

fn view_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InquiryView> {
    Ok(InquiryView {
        inquiry: Inquiry::from_row(row)?,
        property_name: row.get(8)?,
        tenant_fullname: row.get(9)?,
    })
}

pub const DUPLICATE: &str = "Inquiry already submitted";

/// Records a Pending inquiry expiring `INQUIRY_TTL_DAYS` after `now`.
///
/// The duplicate check and insert share one write transaction; the unique index on
/// `(tenant_subject, apartment_id)` turns a lost race into the same conflict.
pub fn create(
    conn: &mut Connection,
    tenant: &str,
    input: &NewInquiry,
    now: DateTime<Utc>,
) -> AppResult<Inquiry> {
    let message = input.message.trim();
    if message.is_empty() {
        return Err(AppError::bad_request("message is required"));
    }

    let tx = write_tx(conn)?;
    let user = users::get_user(&tx, tenant)?;
    if user.account_status == AccountStatus::Deleted {
        return Err(AppError::forbidden("Account has been deleted"));
    }
    let apartment = apartments::get(&tx, input.apartment_id)?;
    if apartment.status != ApartmentStatus::Approved {
        return Err(AppError::bad_request("Apartment is not open for inquiries"));
    }
    if apartment.owner_subject == tenant {
        return Err(AppError::bad_request("You cannot inquire about your own apartment"));
    }

    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM inquiries WHERE tenant_subject = ?1 AND apartment_id = ?2)",
        params![tenant, apartment.id],
        |row| row.get(0),
    )?;
    if exists {
        return Err(AppError::conflict(DUPLICATE));
    }

    let expires_at = now + Duration::days(INQUIRY_TTL_DAYS);
    tx.execute(
        "INSERT INTO inquiries (tenant_subject, apartment_id, message, status, created_at, expires_at, notified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![tenant, apartment.id, message, InquiryStatus::Pending, now, expires_at],
    )
    .map_err(conflict_on_unique(DUPLICATE))?;
    let id = tx.last_insert_rowid();
    let inquiry = get(&tx, id)?;
    tx.commit()?;

    tracing::info!("Inquiry {} created by {} for apartment {}", id, tenant, apartment.id);
    Ok(inquiry)
}

pub fn get(conn: &Connection, id: i64) -> AppResult<Inquiry> {
    conn.query_row(
        &format!("SELECT {} FROM inquiries i WHERE i.id = ?1", Inquiry::COLUMNS),
        params![id],
        Inquiry::from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Inquiry not found"))
}

pub fn list_for_tenant(conn: &Connection, tenant: &str) -> AppResult<Vec<InquiryView>> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE i.tenant_subject = ?1 ORDER BY i.created_at DESC, i.id DESC"
    ))?;
    let rows = stmt
        .query_map(params![tenant], view_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Inquiries on apartments owned by `landlord`, optionally narrowed to one status.
pub fn list_for_landlord(
    conn: &Connection,
    landlord: &str,
    status: Option<InquiryStatus>,
) -> AppResult<Vec<InquiryView>> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE a.owner_subject = ?1 AND (?2 IS NULL OR i.status = ?2)
         ORDER BY i.created_at DESC, i.id DESC"
    ))?;
    let rows = stmt
        .query_map(params![landlord, status], view_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Landlord decision. Repeating a decision overwrites the previous one.
pub fn decide(
    conn: &mut Connection,
    id: i64,
    landlord: &str,
    status: InquiryStatus,
) -> AppResult<Inquiry> {
    if !status.is_decision() {
        return Err(AppError::bad_request("status must be Accepted or Rejected"));
    }
    let tx = write_tx(conn)?;
    let inquiry = get(&tx, id)?;
    apartments::get_owned(&tx, inquiry.apartment_id, landlord)?;
    if inquiry.status == InquiryStatus::Expired {
        return Err(AppError::conflict("Inquiry has expired"));
    }
    tx.execute(
        "UPDATE inquiries SET status = ?1 WHERE id = ?2",
        params![status, id],
    )?;
    let updated = get(&tx, id)?;
    tx.commit()?;

    tracing::info!("Inquiry {} marked {} by {}", id, status, landlord);
    Ok(updated)
}

// -- Sweeps --

/// A pending inquiry old enough to remind the tenant about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub inquiry_id: i64,
    pub apartment_id: i64,
    pub tenant_subject: String,
    pub push_token: Option<String>,
}

impl DueReminder {
    pub fn title(&self) -> &'static str {
        "Inquiry update"
    }

    pub fn body(&self) -> String {
        format!(
            "Your inquiry for apartment {} is still pending. The landlord has not responded yet.",
            self.apartment_id
        )
    }
}

/// Pending, unnotified inquiries created at least `INQUIRY_TTL_DAYS` before `now`.
pub fn due_reminders(conn: &Connection, now: DateTime<Utc>) -> AppResult<Vec<DueReminder>> {
    let cutoff = now - Duration::days(INQUIRY_TTL_DAYS);
    let mut stmt = conn.prepare(
        "SELECT i.id, i.apartment_id, i.tenant_subject, u.push_token
         FROM inquiries i JOIN users u ON u.subject = i.tenant_subject
         WHERE i.status = ?1 AND i.notified = 0 AND i.created_at <= ?2
         ORDER BY i.id",
    )?;
    let rows = stmt
        .query_map(params![InquiryStatus::Pending, cutoff], |row| {
            Ok(DueReminder {
                inquiry_id: row.get(0)?,
                apartment_id: row.get(1)?,
                tenant_subject: row.get(2)?,
                push_token: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Flips `notified` once. Returns false when another sweep got there first.
pub fn mark_notified(conn: &Connection, id: i64) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE inquiries SET notified = 1 WHERE id = ?1 AND notified = 0",
        params![id],
    )?;
    Ok(changed == 1)
}

/// Moves reminded Pending inquiries past their expiry to Expired.
pub fn expire_stale(conn: &Connection, now: DateTime<Utc>) -> AppResult<usize> {
    let changed = conn.execute(
        "UPDATE inquiries SET status = ?1
         WHERE status = ?2 AND notified = 1 AND expires_at < ?3",
        params![InquiryStatus::Expired, InquiryStatus::Pending, now],
    )?;
    Ok(changed)
}
