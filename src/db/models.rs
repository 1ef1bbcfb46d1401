use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;

use crate::domain::money::from_minor;
use crate::domain::{
    AccountStatus, ApartmentStatus, InquiryStatus, MediaKind, TransactionStatus, UserType,
};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub subject: String,
    pub email: String,
    pub phone: Option<String>,
    pub fullname: Option<String>,
    pub address: Option<String>,
    pub valid_id_url: Option<String>,
    pub photo_url: Option<String>,
    pub account_status: AccountStatus,
    pub user_type: UserType,
    pub provider: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub push_token: Option<String>,
}

impl User {
    pub const COLUMNS: &'static str = "id, subject, email, phone, fullname, address, valid_id_url, \
         photo_url, account_status, user_type, provider, birthday, created_at, expires_at, push_token";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            fullname: row.get(4)?,
            address: row.get(5)?,
            valid_id_url: row.get(6)?,
            photo_url: row.get(7)?,
            account_status: row.get(8)?,
            user_type: row.get(9)?,
            provider: row.get(10)?,
            birthday: row.get(11)?,
            created_at: row.get(12)?,
            expires_at: row.get(13)?,
            push_token: row.get(14)?,
        })
    }

    pub fn is_verified_landlord(&self) -> bool {
        self.user_type == UserType::Landlord && self.account_status == AccountStatus::Verified
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Admin {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Admin {
    pub const COLUMNS: &'static str = "id, email, password_hash, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LandlordProfile {
    pub id: i64,
    pub subject: String,
    pub business_name: String,
    pub business_address: String,
    pub business_contact: String,
    pub business_permit_urls: Vec<String>,
    pub verification_id_url: String,
    pub rejection_reason: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LandlordProfile {
    pub const COLUMNS: &'static str = "id, subject, business_name, business_address, \
         business_contact, business_permit_urls, verification_id_url, rejection_reason, \
         verified_at, rejected_at, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let permits: String = row.get(5)?;
        let business_permit_urls = serde_json::from_str(&permits)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        Ok(Self {
            id: row.get(0)?,
            subject: row.get(1)?,
            business_name: row.get(2)?,
            business_address: row.get(3)?,
            business_contact: row.get(4)?,
            business_permit_urls,
            verification_id_url: row.get(6)?,
            rejection_reason: row.get(7)?,
            verified_at: row.get(8)?,
            rejected_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    /// Neither verified nor rejected yet.
    pub fn is_pending(&self) -> bool {
        self.verified_at.is_none() && self.rejected_at.is_none()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Apartment {
    pub id: i64,
    pub owner_subject: String,
    pub property_name: String,
    pub address: String,
    pub property_type: String,
    pub rent_price: f64,
    pub location_link: String,
    pub landmarks: String,
    pub status: ApartmentStatus,
    pub rejection_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Apartment {
    /// Qualified with the `a` alias so it can be used in joins.
    pub const COLUMNS: &'static str = "a.id, a.owner_subject, a.property_name, a.address, \
         a.property_type, a.rent_price, a.location_link, a.landmarks, a.status, \
         a.rejection_reason, a.expires_at, a.created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_subject: row.get(1)?,
            property_name: row.get(2)?,
            address: row.get(3)?,
            property_type: row.get(4)?,
            rent_price: row.get(5)?,
            location_link: row.get(6)?,
            landmarks: row.get(7)?,
            status: row.get(8)?,
            rejection_reason: row.get(9)?,
            expires_at: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApartmentMedia {
    pub id: i64,
    pub apartment_id: i64,
    pub kind: MediaKind,
    pub url: String,
}

impl ApartmentMedia {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            apartment_id: row.get(1)?,
            kind: row.get(2)?,
            url: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Inquiry {
    pub id: i64,
    pub tenant_subject: String,
    pub apartment_id: i64,
    pub message: String,
    pub status: InquiryStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub notified: bool,
}

impl Inquiry {
    pub const COLUMNS: &'static str = "i.id, i.tenant_subject, i.apartment_id, i.message, \
         i.status, i.created_at, i.expires_at, i.notified";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_subject: row.get(1)?,
            apartment_id: row.get(2)?,
            message: row.get(3)?,
            status: row.get(4)?,
            created_at: row.get(5)?,
            expires_at: row.get(6)?,
            notified: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RentalAgreement {
    pub id: i64,
    pub apartment_id: i64,
    pub tenant_subject: String,
    pub landlord_subject: String,
    pub tenant_confirmed: bool,
    pub landlord_confirmed: bool,
    pub start_date: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RentalAgreement {
    pub const COLUMNS: &'static str = "id, apartment_id, tenant_subject, landlord_subject, \
         tenant_confirmed, landlord_confirmed, start_date, is_active, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            apartment_id: row.get(1)?,
            tenant_subject: row.get(2)?,
            landlord_subject: row.get(3)?,
            tenant_confirmed: row.get(4)?,
            landlord_confirmed: row.get(5)?,
            start_date: row.get(6)?,
            is_active: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    pub fn fully_confirmed(&self) -> bool {
        self.tenant_confirmed && self.landlord_confirmed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rating {
    pub id: i64,
    pub apartment_id: i64,
    pub tenant_subject: String,
    pub rating: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rating {
    pub const COLUMNS: &'static str =
        "id, apartment_id, tenant_subject, rating, comment, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            apartment_id: row.get(1)?,
            tenant_subject: row.get(2)?,
            rating: row.get(3)?,
            comment: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

/// Amounts are stored in minor units and exposed in major units.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_subject: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub base_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub interest_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
    pub amount_minor: i64,
    pub currency: String,
    pub source_id: String,
    pub payment_id: Option<String>,
    pub checkout_url: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub const COLUMNS: &'static str = "id, user_subject, base_amount_minor, \
         interest_amount_minor, total_amount_minor, currency, source_id, payment_id, \
         checkout_url, status, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let base: i64 = row.get(2)?;
        let interest: i64 = row.get(3)?;
        let total: i64 = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            user_subject: row.get(1)?,
            base_amount: from_minor(base),
            interest_amount: from_minor(interest),
            total_amount: from_minor(total),
            amount_minor: total,
            currency: row.get(5)?,
            source_id: row.get(6)?,
            payment_id: row.get(7)?,
            checkout_url: row.get(8)?,
            status: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, run_migrations};
    use rusqlite::params;

    #[test]
    fn user_row_maps_enums_and_dates() {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        let now = Utc::now();
        let birthday = NaiveDate::from_ymd_opt(1994, 3, 21).unwrap();
        conn.execute(
            "INSERT INTO users (subject, email, birthday, user_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params!["t1", "t1@example.com", birthday, UserType::Tenant, now],
        )
        .unwrap();

        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE subject = ?1", User::COLUMNS),
                params!["t1"],
                User::from_row,
            )
            .unwrap();
        assert_eq!(user.account_status, AccountStatus::Unverified);
        assert_eq!(user.user_type, UserType::Tenant);
        assert_eq!(user.birthday, Some(birthday));
        assert_eq!(user.created_at, now);
        assert!(user.expires_at.is_none());
        assert!(!user.is_verified_landlord());
    }

    #[test]
    fn landlord_profile_decodes_permit_list() {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO users (subject, email, created_at) VALUES ('u1', 'u1@example.com', ?1)",
            params![now],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO landlord_profiles (subject, business_name, business_address,
                business_contact, business_permit_urls, verification_id_url, created_at)
             VALUES ('u1', 'Sunrise Rentals', 'Cebu', '0917', ?1, 'https://m/id.jpg', ?2)",
            params![r#"["https://m/p1.jpg","https://m/p2.jpg"]"#, now],
        )
        .unwrap();

        let profile = conn
            .query_row(
                &format!("SELECT {} FROM landlord_profiles", LandlordProfile::COLUMNS),
                [],
                LandlordProfile::from_row,
            )
            .unwrap();
        assert_eq!(profile.business_permit_urls.len(), 2);
        assert!(profile.is_pending());
        assert!(!profile.is_rejected());
    }

    #[test]
    fn transaction_exposes_major_units() {
        let pool = create_memory_pool().unwrap();
        run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO transactions (base_amount_minor, interest_amount_minor, total_amount_minor,
                source_id, created_at, updated_at)
             VALUES (100000, 200, 100200, 'src_1', ?1, ?1)",
            params![now],
        )
        .unwrap();

        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions", Transaction::COLUMNS),
                [],
                Transaction::from_row,
            )
            .unwrap();
        assert_eq!(tx.total_amount, Decimal::new(100200, 2));
        assert_eq!(tx.amount_minor, 100_200);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.payment_id.is_none());
    }
}
