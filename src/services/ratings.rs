use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::models::Rating;
use crate::domain::UserType;
use crate::error::{AppError, AppResult};

use super::{apartments, rentals, users, write_tx};

#[derive(Debug, Clone, Deserialize)]
pub struct NewRating {
    pub apartment_id: i64,
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingSummary {
    pub apartment_id: i64,
    pub average: f64,
    pub count: usize,
    pub ratings: Vec<Rating>,
}

/// Creates or overwrites the caller's rating. Only tenants with a fully confirmed
/// rental for the apartment may rate it; the check and the write share a transaction
/// with rental withdrawals.
pub fn submit(conn: &mut Connection, tenant: &str, input: &NewRating) -> AppResult<Rating> {
    let tx = write_tx(conn)?;
    if users::role(&tx, tenant)? != UserType::Tenant {
        return Err(AppError::forbidden("Only tenants can rate apartments"));
    }
    if !(1..=5).contains(&input.rating) {
        return Err(AppError::bad_request("rating must be between 1 and 5"));
    }
    apartments::get(&tx, input.apartment_id)?;
    if !rentals::can_rate(&tx, input.apartment_id, tenant)? {
        return Err(AppError::forbidden(
            "You can only rate apartments you have a confirmed rental for",
        ));
    }

    let now = Utc::now();
    tx.execute(
        "INSERT INTO ratings (apartment_id, tenant_subject, rating, comment, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(apartment_id, tenant_subject)
         DO UPDATE SET rating = excluded.rating, comment = excluded.comment,
                       updated_at = excluded.updated_at",
        params![input.apartment_id, tenant, input.rating, input.comment.trim(), now],
    )?;

    let rating = tx.query_row(
        &format!(
            "SELECT {} FROM ratings WHERE apartment_id = ?1 AND tenant_subject = ?2",
            Rating::COLUMNS
        ),
        params![input.apartment_id, tenant],
        Rating::from_row,
    )?;
    tx.commit()?;
    Ok(rating)
}

/// Average is 0 when nobody has rated the apartment yet.
pub fn summary(conn: &Connection, apartment_id: i64) -> AppResult<RatingSummary> {
    apartments::get(conn, apartment_id)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ratings WHERE apartment_id = ?1 ORDER BY updated_at DESC, id DESC",
        Rating::COLUMNS
    ))?;
    let ratings = stmt
        .query_map(params![apartment_id], Rating::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let count = ratings.len();
    let average = if count == 0 {
        0.0
    } else {
        ratings.iter().map(|r| r.rating as f64).sum::<f64>() / count as f64
    };
    Ok(RatingSummary {
        apartment_id,
        average,
        count,
        ratings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ApartmentStatus;
    use crate::services::rentals::{confirm, Confirmation};
    use crate::services::testing;

    fn rented_setup() -> (crate::state::DbPool, i64) {
        let pool = testing::pool();
        let mut conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        testing::tenant(&conn, "t1");
        let apt = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Approved);
        let mut confirmation = Confirmation {
            apartment_id: apt,
            is_renting: true,
            tenant_id: None,
        };
        confirm(&mut conn, "t1", &confirmation).unwrap();
        confirmation.tenant_id = Some("t1".into());
        confirm(&mut conn, "l1", &confirmation).unwrap();
        drop(conn);
        (pool, apt)
    }

    fn five_stars(apartment_id: i64) -> NewRating {
        NewRating {
            apartment_id,
            rating: 5,
            comment: "Great".into(),
        }
    }

    #[test]
    fn summary_of_unrated_apartment_is_zero() {
        let (pool, apt) = rented_setup();
        let conn = pool.get().unwrap();
        let summary = summary(&conn, apt).unwrap();
        assert_eq!(summary.average, 0.0);
        assert_eq!(summary.count, 0);
    }

    #[test]
    fn submit_upserts_and_averages() {
        let (pool, apt) = rented_setup();
        let mut conn = pool.get().unwrap();

        submit(&mut conn, "t1", &five_stars(apt)).unwrap();
        submit(&mut conn, "t1", &five_stars(apt)).unwrap();
        assert_eq!(summary(&conn, apt).unwrap().average, 5.0);

        let mut lower = five_stars(apt);
        lower.rating = 3;
        lower.comment = "Noisy at night".into();
        let updated = submit(&mut conn, "t1", &lower).unwrap();
        assert_eq!(updated.rating, 3);

        let summary = summary(&conn, apt).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.average, 3.0);
        assert_eq!(summary.ratings[0].comment, "Noisy at night");
    }

    #[test]
    fn submit_enforces_role_range_and_eligibility() {
        let (pool, apt) = rented_setup();
        let mut conn = pool.get().unwrap();
        testing::tenant(&conn, "t2");

        assert!(matches!(
            submit(&mut conn, "l1", &five_stars(apt)),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            submit(&mut conn, "t2", &five_stars(apt)),
            Err(AppError::Forbidden(_))
        ));
        let mut six = five_stars(apt);
        six.rating = 6;
        assert!(matches!(submit(&mut conn, "t1", &six), Err(AppError::BadRequest(_))));
    }
}
