use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::db::models::RentalAgreement;
use crate::error::{AppError, AppResult};

use super::{apartments, users, write_tx};

#[derive(Debug, Clone, Deserialize)]
pub struct Confirmation {
    pub apartment_id: i64,
    #[serde(default = "default_renting")]
    pub is_renting: bool,
    /// Present when the landlord confirms on behalf of a tenant.
    #[serde(default)]
    pub tenant_id: Option<String>,
}

fn default_renting() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Tenant,
    Landlord,
}

pub fn find(conn: &Connection, apartment_id: i64, tenant: &str) -> AppResult<Option<RentalAgreement>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM rental_agreements WHERE apartment_id = ?1 AND tenant_subject = ?2",
                RentalAgreement::COLUMNS
            ),
            params![apartment_id, tenant],
            RentalAgreement::from_row,
        )
        .optional()?)
}

fn rating_exists(conn: &Connection, apartment_id: i64, tenant: &str) -> AppResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM ratings WHERE apartment_id = ?1 AND tenant_subject = ?2)",
        params![apartment_id, tenant],
        |row| row.get(0),
    )?)
}

/// Sets the caller's confirmation flag for an `(apartment, tenant)` pair, creating the
/// agreement on first use. The agreement becomes active once both flags are set.
/// A rated rental can no longer be withdrawn.
pub fn confirm(conn: &mut Connection, caller: &str, input: &Confirmation) -> AppResult<RentalAgreement> {
    let tx = write_tx(conn)?;
    if users::find_by_subject(&tx, caller)?.is_none() {
        return Err(AppError::forbidden("Only user accounts can confirm rentals"));
    }
    let apartment = apartments::get(&tx, input.apartment_id)?;

    let (party, tenant) = match input.tenant_id.as_deref().map(str::trim) {
        Some(tenant) if !tenant.is_empty() => {
            if apartment.owner_subject != caller {
                return Err(AppError::forbidden("You do not own this apartment"));
            }
            users::get_user(&tx, tenant)?;
            (Party::Landlord, tenant.to_string())
        }
        _ => {
            if apartment.owner_subject == caller {
                return Err(AppError::bad_request("tenant_id is required for the landlord"));
            }
            (Party::Tenant, caller.to_string())
        }
    };

    if !input.is_renting && rating_exists(&tx, apartment.id, &tenant)? {
        return Err(AppError::conflict(
            "The tenant has already rated this rental; it can no longer be withdrawn",
        ));
    }

    let now = Utc::now();
    let (tenant_flag, landlord_flag) = match party {
        Party::Tenant => (input.is_renting, false),
        Party::Landlord => (false, input.is_renting),
    };
    let update_column = match party {
        Party::Tenant => "tenant_confirmed",
        Party::Landlord => "landlord_confirmed",
    };
    tx.execute(
        &format!(
            "INSERT INTO rental_agreements (apartment_id, tenant_subject, landlord_subject,
                tenant_confirmed, landlord_confirmed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(apartment_id, tenant_subject)
             DO UPDATE SET {update_column} = excluded.{update_column}, updated_at = excluded.updated_at"
        ),
        params![apartment.id, tenant, apartment.owner_subject, tenant_flag, landlord_flag, now],
    )?;

    let agreement = find(&tx, apartment.id, &tenant)?
        .ok_or_else(|| AppError::Internal("rental agreement missing after upsert".into()))?;
    let active = agreement.fully_confirmed();
    if active != agreement.is_active {
        let start_date = active.then(|| now.date_naive());
        tx.execute(
            "UPDATE rental_agreements
             SET is_active = ?1, start_date = COALESCE(start_date, ?2)
             WHERE id = ?3",
            params![active, start_date, agreement.id],
        )?;
    }
    let agreement = find(&tx, apartment.id, &tenant)?
        .ok_or_else(|| AppError::Internal("rental agreement missing after upsert".into()))?;
    tx.commit()?;

    tracing::info!(
        "Rental {} for apartment {} confirmed by {:?} (active: {})",
        agreement.id,
        apartment.id,
        party,
        agreement.is_active
    );
    Ok(agreement)
}

/// Both parties have confirmed the rental.
pub fn can_rate(conn: &Connection, apartment_id: i64, tenant: &str) -> AppResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM rental_agreements
                       WHERE apartment_id = ?1 AND tenant_subject = ?2
                         AND tenant_confirmed = 1 AND landlord_confirmed = 1)",
        params![apartment_id, tenant],
        |row| row.get(0),
    )?)
}
