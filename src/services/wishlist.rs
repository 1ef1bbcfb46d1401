use chrono::Utc;
use rusqlite::{params, Connection};

use crate::db::conflict_on_unique;
use crate::db::models::Apartment;
use crate::domain::ApartmentStatus;
use crate::error::{AppError, AppResult};

use super::apartments;
use super::listing::{hydrate, ApartmentView, ListingView};

const DUPLICATE: &str = "Apartment is already in your wishlist";

pub fn add(conn: &Connection, tenant: &str, apartment_id: i64) -> AppResult<()> {
    let apartment = apartments::get(conn, apartment_id)?;
    if apartment.status != ApartmentStatus::Approved {
        return Err(AppError::bad_request("Only approved apartments can be saved"));
    }
    conn.execute(
        "INSERT INTO wishlists (tenant_subject, apartment_id, created_at) VALUES (?1, ?2, ?3)",
        params![tenant, apartment_id, Utc::now()],
    )
    .map_err(conflict_on_unique(DUPLICATE))?;
    Ok(())
}

pub fn remove(conn: &Connection, tenant: &str, apartment_id: i64) -> AppResult<()> {
    let removed = conn.execute(
        "DELETE FROM wishlists WHERE tenant_subject = ?1 AND apartment_id = ?2",
        params![tenant, apartment_id],
    )?;
    if removed == 0 {
        return Err(AppError::not_found("Apartment is not in your wishlist"));
    }
    Ok(())
}

/// Saved apartments that are still approved, newest save first, with full listing detail.
pub fn list(conn: &Connection, tenant: &str) -> AppResult<Vec<ApartmentView>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM wishlists w JOIN apartments a ON a.id = w.apartment_id
         WHERE w.tenant_subject = ?1 AND a.status = ?2
         ORDER BY w.created_at DESC, w.id DESC",
        Apartment::COLUMNS
    ))?;
    let apartments = stmt
        .query_map(params![tenant, ApartmentStatus::Approved], Apartment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    apartments
        .into_iter()
        .map(|a| hydrate(conn, a, ListingView::Detailed))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;

    #[test]
    fn add_list_remove() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        testing::tenant(&conn, "t1");
        let apt = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Approved);

        add(&conn, "t1", apt).unwrap();
        assert!(matches!(add(&conn, "t1", apt), Err(AppError::Conflict(_))));

        let saved = list(&conn, "t1").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].apartment.property_name, "Sunrise");
        assert_eq!(saved[0].inquiry_count, Some(0));

        remove(&conn, "t1", apt).unwrap();
        assert!(matches!(remove(&conn, "t1", apt), Err(AppError::NotFound(_))));
        assert!(list(&conn, "t1").unwrap().is_empty());
    }

    #[test]
    fn unapproved_apartments_are_refused_and_hidden() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        testing::tenant(&conn, "t1");
        let pending = testing::apartment(&conn, "l1", "Pending", ApartmentStatus::Pending);
        let apt = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Approved);

        assert!(matches!(add(&conn, "t1", pending), Err(AppError::BadRequest(_))));
        assert!(matches!(add(&conn, "t1", 999), Err(AppError::NotFound(_))));

        add(&conn, "t1", apt).unwrap();
        conn.execute(
            "UPDATE apartments SET status = 'Rejected', rejection_reason = 'x' WHERE id = ?1",
            params![apt],
        )
        .unwrap();
        assert!(list(&conn, "t1").unwrap().is_empty());
    }
}
