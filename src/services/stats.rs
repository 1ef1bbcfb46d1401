// Read-only aggregate queries for the admin dashboard.
use std::collections::BTreeMap;

use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use crate::domain::{AccountStatus, ApartmentStatus, UserType};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountBy<K: Serialize> {
    #[serde(flatten)]
    pub key: K,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTypeKey {
    pub user_type: UserType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStatusKey {
    pub account_status: AccountStatus,
    pub user_type: UserType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApartmentStatusKey {
    pub status: ApartmentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyTypeKey {
    pub property_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusTypeKey {
    pub status: ApartmentStatus,
    pub property_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearCount {
    pub year: i32,
    pub count: i64,
}

/// `?years=2023,2024`; absent means every year with at least one account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct YearsQuery {
    pub years: Option<String>,
}

impl YearsQuery {
    pub fn parse(&self) -> AppResult<Option<Vec<i32>>> {
        let Some(raw) = self.years.as_deref() else {
            return Ok(None);
        };
        let years = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i32>()
                    .map_err(|_| AppError::bad_request(format!("Invalid year: {s}")))
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok((!years.is_empty()).then_some(years))
    }
}

/// Live accounts (Unverified, Pending, Verified) per user type.
pub fn users_by_type(conn: &Connection) -> AppResult<Vec<CountBy<UserTypeKey>>> {
    let active = AccountStatus::ACTIVE;
    let mut stmt = conn.prepare(
        "SELECT user_type, COUNT(*) FROM users
         WHERE account_status IN (?1, ?2, ?3)
         GROUP BY user_type ORDER BY user_type",
    )?;
    let rows = stmt
        .query_map(params![active[0], active[1], active[2]], |row| {
            Ok(CountBy {
                key: UserTypeKey {
                    user_type: row.get(0)?,
                },
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn users_by_status(conn: &Connection) -> AppResult<Vec<CountBy<UserStatusKey>>> {
    let mut stmt = conn.prepare(
        "SELECT account_status, user_type, COUNT(*) FROM users
         GROUP BY account_status, user_type ORDER BY account_status, user_type",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CountBy {
                key: UserStatusKey {
                    account_status: row.get(0)?,
                    user_type: row.get(1)?,
                },
                count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn apartments_by_status(conn: &Connection) -> AppResult<Vec<CountBy<ApartmentStatusKey>>> {
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM apartments GROUP BY status ORDER BY status")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CountBy {
                key: ApartmentStatusKey { status: row.get(0)? },
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Approved listings only.
pub fn apartments_by_type(conn: &Connection) -> AppResult<Vec<CountBy<PropertyTypeKey>>> {
    let mut stmt = conn.prepare(
        "SELECT property_type, COUNT(*) FROM apartments WHERE status = ?1
         GROUP BY property_type ORDER BY property_type",
    )?;
    let rows = stmt
        .query_map(params![ApartmentStatus::Approved], |row| {
            Ok(CountBy {
                key: PropertyTypeKey {
                    property_type: row.get(0)?,
                },
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn apartments_by_status_type(conn: &Connection) -> AppResult<Vec<CountBy<StatusTypeKey>>> {
    let mut stmt = conn.prepare(
        "SELECT status, property_type, COUNT(*) FROM apartments
         GROUP BY status, property_type ORDER BY status, property_type",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CountBy {
                key: StatusTypeKey {
                    status: row.get(0)?,
                    property_type: row.get(1)?,
                },
                count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Accounts created per year, ascending. Requested years with no accounts report zero.
pub fn users_yearly(conn: &Connection, years: Option<&[i32]>) -> AppResult<Vec<YearCount>> {
    let year_expr = "CAST(substr(created_at, 1, 4) AS INTEGER)";
    let mut counts: BTreeMap<i32, i64> = BTreeMap::new();

    match years {
        Some(years) => {
            for year in years {
                counts.insert(*year, 0);
            }
            let placeholders = vec!["?"; years.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {year_expr} AS year, COUNT(*) FROM users
                 WHERE {year_expr} IN ({placeholders}) GROUP BY year"
            ))?;
            let rows = stmt.query_map(params_from_iter(years.iter()), |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (year, count) = row?;
                counts.insert(year, count);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {year_expr} AS year, COUNT(*) FROM users GROUP BY year"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (year, count) = row?;
                counts.insert(year, count);
            }
        }
    }

    Ok(counts
        .into_iter()
        .map(|(year, count)| YearCount { year, count })
        .collect())
}
