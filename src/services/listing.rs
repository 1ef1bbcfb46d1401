// One filter type and one query builder for every apartment listing view.
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::models::Apartment;
use crate::domain::{ApartmentStatus, MediaKind, PageRequest, Paginated};
use crate::error::{AppError, AppResult};

use super::clean_names;

/// Query-string form of a listing search. List-valued filters are comma separated.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ListingQuery {
    pub property_name: Option<String>,
    pub property_type: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub amenities: Option<String>,
    pub house_rules: Option<String>,
    pub status: Option<ApartmentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListingQuery {
    pub fn page(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ListingFilter {
    pub owner: Option<String>,
    pub name_contains: Option<String>,
    pub property_type: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Every listed amenity must be present.
    pub amenities: Vec<String>,
    /// Every listed house rule must be present.
    pub house_rules: Vec<String>,
    pub status: Option<ApartmentStatus>,
    /// Hide soft-deleted rows when no explicit status is requested.
    pub exclude_deleted: bool,
}

fn split_list(raw: &Option<String>) -> Vec<String> {
    let items: Vec<String> = raw
        .as_deref()
        .map(|s| s.split(',').map(String::from).collect())
        .unwrap_or_default();
    clean_names(&items)
}

fn non_empty(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl ListingFilter {
    pub fn from_query(query: &ListingQuery) -> AppResult<Self> {
        for price in [query.min_price, query.max_price].into_iter().flatten() {
            if !price.is_finite() || price < 0.0 {
                return Err(AppError::bad_request("Price bounds must be non-negative numbers"));
            }
        }
        if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
            if min > max {
                return Err(AppError::bad_request("min_price cannot exceed max_price"));
            }
        }
        Ok(Self {
            owner: None,
            name_contains: non_empty(&query.property_name),
            property_type: non_empty(&query.property_type),
            min_price: query.min_price,
            max_price: query.max_price,
            amenities: split_list(&query.amenities),
            house_rules: split_list(&query.house_rules),
            status: query.status,
            exclude_deleted: true,
        })
    }

    /// Public catalogue view: Approved only.
    pub fn approved() -> Self {
        Self {
            status: Some(ApartmentStatus::Approved),
            exclude_deleted: true,
            ..Default::default()
        }
    }

    /// Owner's view: every status except Deleted.
    pub fn owned_by(owner: &str) -> Self {
        Self {
            owner: Some(owner.to_string()),
            exclude_deleted: true,
            ..Default::default()
        }
    }

    /// WHERE clause over alias `a` plus its positional values.
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let bind = |values: &mut Vec<Value>, v: Value| {
            values.push(v);
            format!("?{}", values.len())
        };

        if let Some(ref owner) = self.owner {
            let p = bind(&mut values, Value::Text(owner.clone()));
            clauses.push(format!("a.owner_subject = {p}"));
        }
        match self.status {
            Some(status) => {
                let p = bind(&mut values, Value::Text(status.as_str().to_string()));
                clauses.push(format!("a.status = {p}"));
            }
            None if self.exclude_deleted => clauses.push("a.status != 'Deleted'".to_string()),
            None => {}
        }
        if let Some(ref name) = self.name_contains {
            let p = bind(&mut values, Value::Text(format!("%{}%", escape_like(name))));
            clauses.push(format!("a.property_name LIKE {p} ESCAPE '\\'"));
        }
        if let Some(ref property_type) = self.property_type {
            let p = bind(&mut values, Value::Text(property_type.clone()));
            clauses.push(format!("a.property_type = {p}"));
        }
        if let Some(min) = self.min_price {
            let p = bind(&mut values, Value::Real(min));
            clauses.push(format!("a.rent_price >= {p}"));
        }
        if let Some(max) = self.max_price {
            let p = bind(&mut values, Value::Real(max));
            clauses.push(format!("a.rent_price <= {p}"));
        }
        for (names, junction, dictionary, key) in [
            (&self.amenities, "apartment_amenities", "amenities", "amenity_id"),
            (&self.house_rules, "apartment_house_rules", "house_rules", "house_rule_id"),
        ] {
            if names.is_empty() {
                continue;
            }
            let placeholders = names
                .iter()
                .map(|n| bind(&mut values, Value::Text(n.clone())))
                .collect::<Vec<_>>()
                .join(", ");
            let count = bind(&mut values, Value::Integer(names.len() as i64));
            clauses.push(format!(
                "a.id IN (SELECT j.apartment_id FROM {junction} j
                          JOIN {dictionary} d ON d.id = j.{key}
                          WHERE d.name IN ({placeholders})
                          GROUP BY j.apartment_id
                          HAVING COUNT(DISTINCT d.id) = {count})"
            ));
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (sql, values)
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Which joined fields a listing exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingView {
    Public,
    Detailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApartmentView {
    #[serde(flatten)]
    pub apartment: Apartment,
    pub amenities: Vec<String>,
    pub house_rules: Vec<String>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inquiry_count: Option<i64>,
}

pub fn search(
    conn: &Connection,
    filter: &ListingFilter,
    page: PageRequest,
    view: ListingView,
) -> AppResult<Paginated<ApartmentView>> {
    let (where_sql, mut values) = filter.where_clause();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM apartments a {where_sql}"),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;
    let window = page.resolve(total);

    values.push(Value::Integer(window.limit));
    values.push(Value::Integer(window.offset));
    let sql = format!(
        "SELECT {} FROM apartments a {where_sql}
         ORDER BY a.created_at DESC, a.id DESC
         LIMIT ?{} OFFSET ?{}",
        Apartment::COLUMNS,
        values.len() - 1,
        values.len()
    );
    let mut stmt = conn.prepare(&sql)?;
    let apartments = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), Apartment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let items = apartments
        .into_iter()
        .map(|a| hydrate(conn, a, view))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Paginated::new(window, total, items))
}

/// Attaches dictionaries and media to an apartment row.
pub fn hydrate(conn: &Connection, apartment: Apartment, view: ListingView) -> AppResult<ApartmentView> {
    let amenities = names_for(
        conn,
        "SELECT d.name FROM apartment_amenities j JOIN amenities d ON d.id = j.amenity_id
         WHERE j.apartment_id = ?1 ORDER BY d.name",
        apartment.id,
    )?;
    let house_rules = names_for(
        conn,
        "SELECT d.name FROM apartment_house_rules j JOIN house_rules d ON d.id = j.house_rule_id
         WHERE j.apartment_id = ?1 ORDER BY d.name",
        apartment.id,
    )?;

    let mut images = Vec::new();
    let mut videos = Vec::new();
    let mut stmt =
        conn.prepare("SELECT kind, url FROM apartment_media WHERE apartment_id = ?1 ORDER BY id")?;
    let media = stmt.query_map(params![apartment.id], |row| {
        Ok((row.get::<_, MediaKind>(0)?, row.get::<_, String>(1)?))
    })?;
    for entry in media {
        match entry? {
            (MediaKind::Image, url) => images.push(url),
            (MediaKind::Video, url) => videos.push(url),
        }
    }

    let inquiry_count = match view {
        ListingView::Public => None,
        ListingView::Detailed => Some(conn.query_row(
            "SELECT COUNT(*) FROM inquiries WHERE apartment_id = ?1",
            params![apartment.id],
            |row| row.get(0),
        )?),
    };

    Ok(ApartmentView {
        apartment,
        amenities,
        house_rules,
        images,
        videos,
        inquiry_count,
    })
}

fn names_for(conn: &Connection, sql: &str, apartment_id: i64) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let names = stmt
        .query_map(params![apartment_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;

    fn link(conn: &Connection, apartment_id: i64, amenities: &[&str], rules: &[&str]) {
        for name in amenities {
            conn.execute("INSERT OR IGNORE INTO amenities (name) VALUES (?1)", params![name])
                .unwrap();
            conn.execute(
                "INSERT INTO apartment_amenities (apartment_id, amenity_id)
                 SELECT ?1, id FROM amenities WHERE name = ?2",
                params![apartment_id, name],
            )
            .unwrap();
        }
        for name in rules {
            conn.execute("INSERT OR IGNORE INTO house_rules (name) VALUES (?1)", params![name])
                .unwrap();
            conn.execute(
                "INSERT INTO apartment_house_rules (apartment_id, house_rule_id)
                 SELECT ?1, id FROM house_rules WHERE name = ?2",
                params![apartment_id, name],
            )
            .unwrap();
        }
    }

    fn names(page: &Paginated<ApartmentView>) -> Vec<String> {
        let mut names: Vec<_> = page
            .items
            .iter()
            .map(|v| v.apartment.property_name.clone())
            .collect();
        names.sort();
        names
    }

    fn seed(conn: &Connection) -> (i64, i64, i64) {
        testing::landlord(conn, "l1");
        let a = testing::apartment_with(conn, "l1", "Sunrise Loft", "Condo", 15_000.0, ApartmentStatus::Approved);
        let b = testing::apartment_with(conn, "l1", "Sunset Villa", "House", 30_000.0, ApartmentStatus::Approved);
        let c = testing::apartment_with(conn, "l1", "Harbor 100%", "Condo", 9_000.0, ApartmentStatus::Pending);
        testing::apartment_with(conn, "l1", "Old Shack", "House", 1_000.0, ApartmentStatus::Deleted);
        link(conn, a, &["WiFi", "Parking"], &["No pets"]);
        link(conn, b, &["WiFi"], &["No pets", "No smoking"]);
        (a, b, c)
    }

    #[test]
    fn approved_view_hides_other_statuses() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        seed(&conn);
        let page = search(&conn, &ListingFilter::approved(), PageRequest::default(), ListingView::Public).unwrap();
        assert_eq!(names(&page), vec!["Sunrise Loft", "Sunset Villa"]);
        assert!(page.items.iter().all(|v| v.inquiry_count.is_none()));
    }

    #[test]
    fn owner_view_excludes_deleted_only() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        seed(&conn);
        let page = search(&conn, &ListingFilter::owned_by("l1"), PageRequest::default(), ListingView::Detailed).unwrap();
        assert_eq!(page.total, 3);
        assert!(page.items.iter().all(|v| v.inquiry_count == Some(0)));
    }

    #[test]
    fn amenities_and_rules_must_all_match() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        seed(&conn);

        let query = ListingQuery {
            amenities: Some("wifi, parking".into()),
            ..Default::default()
        };
        let page = search(&conn, &ListingFilter::from_query(&query).unwrap(), query.page(), ListingView::Public).unwrap();
        assert_eq!(names(&page), vec!["Sunrise Loft"]);

        let query = ListingQuery {
            amenities: Some("WiFi".into()),
            house_rules: Some("No pets,No smoking".into()),
            ..Default::default()
        };
        let page = search(&conn, &ListingFilter::from_query(&query).unwrap(), query.page(), ListingView::Public).unwrap();
        assert_eq!(names(&page), vec!["Sunset Villa"]);

        let sunrise = &search(&conn, &ListingFilter::approved(), PageRequest::default(), ListingView::Public)
            .unwrap()
            .items
            .into_iter()
            .find(|v| v.apartment.property_name == "Sunrise Loft")
            .unwrap();
        assert_eq!(sunrise.amenities, vec!["Parking", "WiFi"]);
        assert_eq!(sunrise.house_rules, vec!["No pets"]);
    }

    #[test]
    fn name_price_type_and_status_filters() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        seed(&conn);

        let query = ListingQuery {
            property_name: Some("SUN".into()),
            min_price: Some(20_000.0),
            ..Default::default()
        };
        let page = search(&conn, &ListingFilter::from_query(&query).unwrap(), query.page(), ListingView::Public).unwrap();
        assert_eq!(names(&page), vec!["Sunset Villa"]);

        // LIKE wildcards in the search text are literal
        let query = ListingQuery {
            property_name: Some("100%".into()),
            status: Some(ApartmentStatus::Pending),
            ..Default::default()
        };
        let page = search(&conn, &ListingFilter::from_query(&query).unwrap(), query.page(), ListingView::Public).unwrap();
        assert_eq!(names(&page), vec!["Harbor 100%"]);

        let query = ListingQuery {
            property_type: Some("House".into()),
            ..Default::default()
        };
        let page = search(&conn, &ListingFilter::from_query(&query).unwrap(), query.page(), ListingView::Public).unwrap();
        assert_eq!(names(&page), vec!["Sunset Villa"]);
    }

    #[test]
    fn pagination_resets_past_the_end() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        seed(&conn);

        let page = search(
            &conn,
            &ListingFilter::approved(),
            PageRequest { page: Some(2), limit: Some(1) },
            ListingView::Public,
        )
        .unwrap();
        assert_eq!(page.page, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_pages, 2);

        let page = search(
            &conn,
            &ListingFilter::approved(),
            PageRequest { page: Some(5), limit: Some(1) },
            ListingView::Public,
        )
        .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn invalid_price_bounds_are_rejected() {
        let inverted = ListingQuery {
            min_price: Some(10.0),
            max_price: Some(5.0),
            ..Default::default()
        };
        assert!(ListingFilter::from_query(&inverted).is_err());

        let negative = ListingQuery {
            min_price: Some(-1.0),
            ..Default::default()
        };
        assert!(ListingFilter::from_query(&negative).is_err());
    }
}
