use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Deserialize;

use crate::db::conflict_on_unique;
use crate::db::models::Apartment;
use crate::domain::{ApartmentStatus, MediaKind};
use crate::error::{AppError, AppResult};

use super::listing::{hydrate, ApartmentView, ListingView};
use super::users::require_verified_landlord;
use super::{clean_names, write_tx};

#[derive(Debug, Clone, Deserialize)]
pub struct NewApartment {
    pub property_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub property_type: String,
    #[serde(default)]
    pub rent_price: f64,
    #[serde(default)]
    pub location_link: String,
    #[serde(default)]
    pub landmarks: String,
    #[serde(default)]
    pub amenities: Vec<String>,
    #[serde(default)]
    pub house_rules: Vec<String>,
    /// URLs copied to the media store before the apartment is stored.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

impl NewApartment {
    pub fn validate(&self) -> AppResult<()> {
        if self.property_name.trim().is_empty() {
            return Err(AppError::bad_request("property_name is required"));
        }
        if !self.rent_price.is_finite() || self.rent_price < 0.0 {
            return Err(AppError::bad_request("rent_price must be a non-negative number"));
        }
        Ok(())
    }

    pub fn media_inputs(&self) -> Vec<(MediaKind, String)> {
        media_inputs(&self.images, &self.videos)
    }
}

/// Pairs each non-empty input with its kind, images first.
pub fn media_inputs(images: &[String], videos: &[String]) -> Vec<(MediaKind, String)> {
    let tagged = |kind: MediaKind, inputs: &[String]| {
        inputs
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| (kind, s.to_string()))
            .collect::<Vec<_>>()
    };
    let mut all = tagged(MediaKind::Image, images);
    all.extend(tagged(MediaKind::Video, videos));
    all
}

fn exists_for_owner(conn: &Connection, owner: &str, input: &NewApartment) -> AppResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM apartments
                       WHERE owner_subject = ?1 AND property_name = ?2 AND location_link = ?3)",
        params![owner, input.property_name.trim(), input.location_link.trim()],
        |row| row.get(0),
    )?)
}

const DUPLICATE: &str = "An apartment with this name and location already exists";

/// Landlord and duplicate checks, run before any media is uploaded.
pub fn check_can_create(conn: &Connection, owner: &str, input: &NewApartment) -> AppResult<()> {
    input.validate()?;
    require_verified_landlord(conn, owner)?;
    if exists_for_owner(conn, owner, input)? {
        return Err(AppError::conflict(DUPLICATE));
    }
    Ok(())
}

/// Inserts the apartment as Pending with its dictionaries and media in one transaction.
pub fn create(
    conn: &mut Connection,
    owner: &str,
    input: &NewApartment,
    media: &[(MediaKind, String)],
) -> AppResult<ApartmentView> {
    input.validate()?;
    let tx = write_tx(conn)?;
    require_verified_landlord(&tx, owner)?;

    tx.execute(
        "INSERT INTO apartments (owner_subject, property_name, address, property_type,
            rent_price, location_link, landmarks, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            owner,
            input.property_name.trim(),
            input.address.trim(),
            input.property_type.trim(),
            input.rent_price,
            input.location_link.trim(),
            input.landmarks.trim(),
            ApartmentStatus::Pending,
            Utc::now()
        ],
    )
    .map_err(conflict_on_unique(DUPLICATE))?;
    let id = tx.last_insert_rowid();

    link_names(&tx, id, &clean_names(&input.amenities), "amenities", "apartment_amenities", "amenity_id")?;
    link_names(&tx, id, &clean_names(&input.house_rules), "house_rules", "apartment_house_rules", "house_rule_id")?;
    insert_media(&tx, id, media)?;

    let apartment = get(&tx, id)?;
    let view = hydrate(&tx, apartment, ListingView::Detailed)?;
    tx.commit()?;

    tracing::info!("Apartment {} created by {}", id, owner);
    Ok(view)
}

/// Get-or-create each dictionary entry by name, then link it.
fn link_names(
    tx: &Transaction<'_>,
    apartment_id: i64,
    names: &[String],
    dictionary: &str,
    junction: &str,
    key: &str,
) -> AppResult<()> {
    for name in names {
        tx.execute(
            &format!("INSERT INTO {dictionary} (name) VALUES (?1) ON CONFLICT(name) DO NOTHING"),
            params![name],
        )?;
        let dict_id: i64 = tx.query_row(
            &format!("SELECT id FROM {dictionary} WHERE name = ?1"),
            params![name],
            |row| row.get(0),
        )?;
        tx.execute(
            &format!("INSERT OR IGNORE INTO {junction} (apartment_id, {key}) VALUES (?1, ?2)"),
            params![apartment_id, dict_id],
        )?;
    }
    Ok(())
}

fn insert_media(tx: &Transaction<'_>, apartment_id: i64, media: &[(MediaKind, String)]) -> AppResult<()> {
    let now = Utc::now();
    for (kind, url) in media {
        tx.execute(
            "INSERT INTO apartment_media (apartment_id, kind, url, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![apartment_id, kind, url, now],
        )?;
    }
    Ok(())
}

pub fn find(conn: &Connection, id: i64) -> AppResult<Option<Apartment>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM apartments a WHERE a.id = ?1", Apartment::COLUMNS),
            params![id],
            Apartment::from_row,
        )
        .optional()?)
}

pub fn get(conn: &Connection, id: i64) -> AppResult<Apartment> {
    find(conn, id)?.ok_or_else(|| AppError::not_found("Apartment not found"))
}

/// 404 when missing, 403 when the caller is not the owner.
pub fn get_owned(conn: &Connection, id: i64, owner: &str) -> AppResult<Apartment> {
    let apartment = get(conn, id)?;
    if apartment.owner_subject != owner {
        return Err(AppError::forbidden("You do not own this apartment"));
    }
    Ok(apartment)
}

/// Approved apartments are visible to everyone; other statuses only to owner and admins.
pub fn detail(conn: &Connection, id: i64, viewer: &str, is_admin: bool) -> AppResult<ApartmentView> {
    let apartment = get(conn, id)?;
    let privileged = is_admin || apartment.owner_subject == viewer;
    if apartment.status != ApartmentStatus::Approved && !privileged {
        return Err(AppError::not_found("Apartment not found"));
    }
    let view = if privileged {
        ListingView::Detailed
    } else {
        ListingView::Public
    };
    hydrate(conn, apartment, view)
}

// -- Admin review --

pub fn approve(conn: &Connection, id: i64) -> AppResult<Apartment> {
    let apartment = get(conn, id)?;
    match apartment.status {
        ApartmentStatus::Deleted => return Err(AppError::conflict("Apartment has been deleted")),
        ApartmentStatus::Approved => return Err(AppError::conflict("Apartment is already approved")),
        ApartmentStatus::Pending | ApartmentStatus::Rejected => {}
    }
    conn.execute(
        "UPDATE apartments SET status = ?1, rejection_reason = NULL WHERE id = ?2",
        params![ApartmentStatus::Approved, id],
    )?;
    tracing::info!("Apartment {} approved", id);
    get(conn, id)
}

pub fn reject(conn: &Connection, id: i64, reason: &str) -> AppResult<Apartment> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::bad_request("A rejection reason is required"));
    }
    let apartment = get(conn, id)?;
    match apartment.status {
        ApartmentStatus::Rejected => return Err(AppError::conflict("Apartment is already rejected")),
        ApartmentStatus::Deleted => return Err(AppError::conflict("Apartment has been deleted")),
        ApartmentStatus::Pending | ApartmentStatus::Approved => {}
    }
    conn.execute(
        "UPDATE apartments SET status = ?1, rejection_reason = ?2 WHERE id = ?3",
        params![ApartmentStatus::Rejected, reason, id],
    )?;
    tracing::info!("Apartment {} rejected", id);
    get(conn, id)
}

// -- Landlord delete --

/// Which apartments a delete request may remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteScope {
    RejectedOnly,
    Any,
}

/// Physically removes an owned apartment. Media, dictionary links, inquiries, wishlist
/// entries, rental agreements and ratings go with it through ON DELETE CASCADE.
pub fn delete_owned(conn: &Connection, id: i64, owner: &str, scope: DeleteScope) -> AppResult<()> {
    let apartment = get_owned(conn, id, owner)?;
    if scope == DeleteScope::RejectedOnly && apartment.status != ApartmentStatus::Rejected {
        return Err(AppError::conflict("Only rejected apartments can be deleted here"));
    }
    conn.execute("DELETE FROM apartments WHERE id = ?1", params![id])?;
    tracing::info!("Apartment {} deleted by owner {}", id, owner);
    Ok(())
}

// -- Media --

/// Ownership check run before media is uploaded.
pub fn check_can_add_media(conn: &Connection, id: i64, owner: &str) -> AppResult<()> {
    let apartment = get_owned(conn, id, owner)?;
    if apartment.status == ApartmentStatus::Deleted {
        return Err(AppError::conflict("Apartment has been deleted"));
    }
    Ok(())
}

pub fn add_media(
    conn: &mut Connection,
    id: i64,
    owner: &str,
    media: &[(MediaKind, String)],
) -> AppResult<ApartmentView> {
    if media.is_empty() {
        return Err(AppError::bad_request("At least one image or video is required"));
    }
    let tx = write_tx(conn)?;
    check_can_add_media(&tx, id, owner)?;
    insert_media(&tx, id, media)?;
    let view = hydrate(&tx, get(&tx, id)?, ListingView::Detailed)?;
    tx.commit()?;
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountStatus, UserType};
    use crate::services::testing;

    fn sunrise() -> NewApartment {
        NewApartment {
            property_name: "Sunrise".into(),
            address: "12 Mango Ave".into(),
            property_type: "Condo".into(),
            rent_price: 15_000.0,
            location_link: "https://maps.example.com/sunrise".into(),
            landmarks: "Near the mall".into(),
            amenities: vec!["WiFi".into(), "wifi".into(), "Parking".into()],
            house_rules: vec!["No pets".into()],
            images: vec!["https://origin/a.jpg".into()],
            videos: vec![],
        }
    }

    fn media() -> Vec<(MediaKind, String)> {
        vec![(MediaKind::Image, "https://media/a.jpg".to_string())]
    }

    #[test]
    fn create_stores_pending_apartment_with_links() {
        let pool = testing::pool();
        let mut conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");

        check_can_create(&conn, "l1", &sunrise()).unwrap();
        let view = create(&mut conn, "l1", &sunrise(), &media()).unwrap();
        assert_eq!(view.apartment.status, ApartmentStatus::Pending);
        assert_eq!(view.amenities, vec!["Parking", "WiFi"]);
        assert_eq!(view.house_rules, vec!["No pets"]);
        assert_eq!(view.images, vec!["https://media/a.jpg"]);

        // Dictionary entries are shared between apartments
        let mut other = sunrise();
        other.property_name = "Sunset".into();
        create(&mut conn, "l1", &other, &[]).unwrap();
        let wifi: i64 = conn
            .query_row("SELECT COUNT(*) FROM amenities WHERE name = 'wifi'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(wifi, 1);
    }

    #[test]
    fn duplicate_name_and_location_conflicts() {
        let pool = testing::pool();
        let mut conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        create(&mut conn, "l1", &sunrise(), &media()).unwrap();

        assert!(matches!(
            check_can_create(&conn, "l1", &sunrise()),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            create(&mut conn, "l1", &sunrise(), &media()),
            Err(AppError::Conflict(_))
        ));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM apartment_media", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn only_verified_landlords_create() {
        let pool = testing::pool();
        let mut conn = pool.get().unwrap();
        testing::tenant(&conn, "t1");
        testing::user(&conn, "l2", UserType::Landlord, AccountStatus::Pending);

        for subject in ["t1", "l2"] {
            assert!(matches!(
                create(&mut conn, subject, &sunrise(), &[]),
                Err(AppError::Forbidden(_))
            ));
        }
    }

    #[test]
    fn approve_and_reject_transitions() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        let id = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Pending);

        assert!(matches!(reject(&conn, id, ""), Err(AppError::BadRequest(_))));
        let rejected = reject(&conn, id, "Blurry photos").unwrap();
        assert_eq!(rejected.status, ApartmentStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Blurry photos"));
        assert!(matches!(reject(&conn, id, "again"), Err(AppError::Conflict(_))));

        let approved = approve(&conn, id).unwrap();
        assert_eq!(approved.status, ApartmentStatus::Approved);
        assert!(approved.rejection_reason.is_none());
        assert!(matches!(approve(&conn, 999), Err(AppError::NotFound(_))));
    }

    #[test]
    fn delete_scopes_and_cascade() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        testing::landlord(&conn, "l2");
        testing::tenant(&conn, "t1");
        let id = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Approved);
        let now = Utc::now();
        conn.execute(
            "INSERT INTO wishlists (tenant_subject, apartment_id, created_at) VALUES ('t1', ?1, ?2)",
            params![id, now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO inquiries (tenant_subject, apartment_id, message, created_at, expires_at)
             VALUES ('t1', ?1, 'hi', ?2, ?2)",
            params![id, now],
        )
        .unwrap();

        assert!(matches!(
            delete_owned(&conn, id, "l2", DeleteScope::Any),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            delete_owned(&conn, id, "l1", DeleteScope::RejectedOnly),
            Err(AppError::Conflict(_))
        ));

        delete_owned(&conn, id, "l1", DeleteScope::Any).unwrap();
        for table in ["apartments", "wishlists", "inquiries"] {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0, "{table} not emptied");
        }
    }

    #[test]
    fn detail_hides_unapproved_from_strangers() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        let id = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Pending);

        assert!(matches!(detail(&conn, id, "t1", false), Err(AppError::NotFound(_))));
        assert!(detail(&conn, id, "l1", false).unwrap().inquiry_count.is_some());
        assert!(detail(&conn, id, "admin:1", true).is_ok());
    }

    #[test]
    fn add_media_requires_ownership() {
        let pool = testing::pool();
        let mut conn = pool.get().unwrap();
        testing::landlord(&conn, "l1");
        let id = testing::apartment(&conn, "l1", "Sunrise", ApartmentStatus::Approved);

        assert!(matches!(
            add_media(&mut conn, id, "someone", &media()),
            Err(AppError::Forbidden(_))
        ));
        let media = media_inputs(&["https://m/a.jpg".into()], &["https://m/tour.mp4".into(), " ".into()]);
        let view = add_media(&mut conn, id, "l1", &media).unwrap();
        assert_eq!(view.images.len(), 1);
        assert_eq!(view.videos, vec!["https://m/tour.mp4"]);
    }
}
