use axum::extract::State;
use axum::routing::get;
use axum::Router;

use crate::error::AppResult;
use crate::extractors::{AdminUser, QueryParams};
use crate::response::ApiResponse;
use crate::services::stats::{
    self, ApartmentStatusKey, CountBy, PropertyTypeKey, StatusTypeKey, UserStatusKey, UserTypeKey,
    YearCount, YearsQuery,
};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats/users/by-type", get(users_by_type))
        .route("/stats/users/by-status", get(users_by_status))
        .route("/stats/users/yearly", get(users_yearly))
        .route("/stats/apartments/by-status", get(apartments_by_status))
        .route("/stats/apartments/by-type", get(apartments_by_type))
        .route("/stats/apartments/by-status-type", get(apartments_by_status_type))
}

async fn users_by_type(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<Vec<CountBy<UserTypeKey>>>> {
    Ok(ApiResponse::ok("Users by type", stats::users_by_type(&*state.db.get()?)?))
}

async fn users_by_status(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<Vec<CountBy<UserStatusKey>>>> {
    Ok(ApiResponse::ok("Users by status", stats::users_by_status(&*state.db.get()?)?))
}

/// GET /stats/users/yearly?years=2024,2025
async fn users_yearly(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(query): QueryParams<YearsQuery>,
) -> AppResult<ApiResponse<Vec<YearCount>>> {
    let years = query.parse()?;
    let counts = stats::users_yearly(&*state.db.get()?, years.as_deref())?;
    Ok(ApiResponse::ok("Users per year", counts))
}

async fn apartments_by_status(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<Vec<CountBy<ApartmentStatusKey>>>> {
    Ok(ApiResponse::ok(
        "Apartments by status",
        stats::apartments_by_status(&*state.db.get()?)?,
    ))
}

async fn apartments_by_type(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<Vec<CountBy<PropertyTypeKey>>>> {
    Ok(ApiResponse::ok(
        "Approved apartments by type",
        stats::apartments_by_type(&*state.db.get()?)?,
    ))
}

async fn apartments_by_status_type(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<Vec<CountBy<StatusTypeKey>>>> {
    Ok(ApiResponse::ok(
        "Apartments by status and type",
        stats::apartments_by_status_type(&*state.db.get()?)?,
    ))
}
