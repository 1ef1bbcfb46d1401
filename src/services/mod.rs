// Domain operations. Each function runs against a borrowed connection and owns its
// transaction when it touches more than one row; handlers do external I/O first.
pub mod apartments;
pub mod inquiries;
pub mod landlords;
pub mod listing;
pub mod payments;
pub mod ratings;
pub mod rentals;
pub mod stats;
pub mod users;
pub mod wishlist;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::AppResult;

/// Opens a write transaction that takes the database lock up front, so a
/// read-then-write sequence inside it cannot be interleaved.
pub(crate) fn write_tx(conn: &mut Connection) -> AppResult<Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Trims and drops empty entries, keeping first-seen order and dropping
/// case-insensitive duplicates.
pub(crate) fn clean_names(names: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_lowercase()))
        .map(String::from)
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, Utc};
    use rusqlite::{params, Connection};

    use crate::db::{create_memory_pool, run_migrations};
    use crate::domain::{AccountStatus, ApartmentStatus, UserType};
    use crate::state::DbPool;

    pub fn pool() -> DbPool {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        pool
    }

    pub fn user(conn: &Connection, subject: &str, user_type: UserType, status: AccountStatus) {
        conn.execute(
            "INSERT INTO users (subject, email, fullname, user_type, account_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                subject,
                format!("{subject}@example.com"),
                format!("User {subject}"),
                user_type,
                status,
                Utc::now()
            ],
        )
        .unwrap();
    }

    pub fn landlord(conn: &Connection, subject: &str) {
        user(conn, subject, UserType::Landlord, AccountStatus::Verified);
    }

    pub fn tenant(conn: &Connection, subject: &str) {
        user(conn, subject, UserType::Tenant, AccountStatus::Unverified);
    }

    pub fn apartment(conn: &Connection, owner: &str, name: &str, status: ApartmentStatus) -> i64 {
        apartment_with(conn, owner, name, "Condo", 12_000.0, status)
    }

    pub fn apartment_with(
        conn: &Connection,
        owner: &str,
        name: &str,
        property_type: &str,
        rent_price: f64,
        status: ApartmentStatus,
    ) -> i64 {
        let expires_at: Option<DateTime<Utc>> =
            (status == ApartmentStatus::Deleted).then(Utc::now);
        conn.execute(
            "INSERT INTO apartments (owner_subject, property_name, address, property_type,
                rent_price, location_link, status, expires_at, created_at)
             VALUES (?1, ?2, 'Cebu City', ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                owner,
                name,
                property_type,
                rent_price,
                format!("https://maps.example.com/{name}"),
                status,
                expires_at,
                Utc::now()
            ],
        )
        .unwrap();
        conn.last_insert_rowid()
    }
}
