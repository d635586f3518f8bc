use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use coursemail_core::ServiceError;

use crate::api::{acting_user, usable_course, AppState};
use crate::model::{CourseId, GroupId, UserId};
use crate::service::user_search::UserSearch;

pub fn routes() -> Router<AppState> {
    Router::new().route("/courses/{id}/users", get(search_users))
}

#[derive(Deserialize, Default)]
struct UsersQuery {
    roleid: Option<i64>,
    groupid: Option<i64>,
    #[serde(default)]
    name: String,
    /// Comma-separated user IDs to restrict the search to.
    include: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

fn parse_include(include: &str) -> Result<Vec<UserId>, ServiceError> {
    include
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<i64>()
                .map(UserId)
                .map_err(|_| ServiceError::Validation(format!("invalid user id: {t}")))
        })
        .collect()
}

async fn search_users(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let course = CourseId(id);
    usable_course(&svc, user, course)?;

    let mut search = UserSearch::new(user, course);
    search.roleid = query.roleid;
    search.groupid = query.groupid.map(GroupId);
    search.name = query.name;
    if let Some(include) = &query.include {
        search.include = parse_include(include)?;
    }

    let total = svc.count_users(&search).map_err(ServiceError::from)?;
    let users = svc
        .search_users(&search, query.offset, query.limit)
        .map_err(ServiceError::from)?;
    let items: Vec<_> = users
        .iter()
        .map(|u| {
            json!({
                "id": u.id,
                "firstname": u.firstname,
                "lastname": u.lastname,
                "fullname": u.fullname(),
            })
        })
        .collect();
    Ok(Json(json!({"items": items, "total": total})))
}
