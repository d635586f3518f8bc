//! Directory sync endpoints. The hosting platform pushes its courses,
//! users, enrolments, groups and capability grants here; the mail
//! module never writes them on its own.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use coursemail_core::ServiceError;

use crate::api::{acting_user, AppState};
use crate::model::{Course, CourseId, Group, GroupId, GroupMode, User, UserId};
use crate::service::Capability;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/courses", get(list_courses))
        .route("/courses/{id}", put(upsert_course))
        .route("/courses/{id}/messages", delete(delete_course_messages))
        .route(
            "/courses/{id}/enrolments/{userid}",
            put(enrol).delete(unenrol),
        )
        .route("/users/{id}", put(upsert_user))
        .route("/groups/{id}", put(upsert_group))
        .route(
            "/groups/{id}/members/{userid}",
            put(add_group_member).delete(remove_group_member),
        )
        .route(
            "/capabilities/{capability}/{courseid}/{userid}",
            put(grant_capability).delete(revoke_capability),
        )
}

#[derive(Deserialize)]
struct CourseBody {
    shortname: String,
    fullname: String,
    #[serde(default = "default_true")]
    visible: bool,
    #[serde(default)]
    groupmode: i64,
    #[serde(default)]
    defaultgroupingid: i64,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct UserBody {
    firstname: String,
    lastname: String,
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct EnrolBody {
    roleid: i64,
}

#[derive(Deserialize)]
struct GroupBody {
    courseid: i64,
    name: String,
}

fn parse_capability(value: &str) -> Result<Capability, ServiceError> {
    Capability::from_str(value)
        .ok_or_else(|| ServiceError::Validation(format!("unknown capability: {value}")))
}

/// Courses the acting user may use mail in.
async fn list_courses(
    State(svc): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let courses = svc.fetch_courses(user).map_err(ServiceError::from)?;
    Ok(Json(json!({"items": courses})))
}

async fn upsert_course(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CourseBody>,
) -> Result<StatusCode, ServiceError> {
    let groupmode = GroupMode::from_i64(body.groupmode)
        .ok_or_else(|| ServiceError::Validation(format!("invalid groupmode: {}", body.groupmode)))?;
    svc.upsert_course(&Course {
        id: CourseId(id),
        shortname: body.shortname,
        fullname: body.fullname,
        visible: body.visible,
        groupmode,
        defaultgroupingid: body.defaultgroupingid,
    })
    .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_course_messages(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServiceError> {
    svc.delete_course_messages(CourseId(id)).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_user(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UserBody>,
) -> Result<StatusCode, ServiceError> {
    svc.upsert_user(&User {
        id: UserId(id),
        firstname: body.firstname,
        lastname: body.lastname,
        email: body.email,
    })
    .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enrol(
    State(svc): State<AppState>,
    Path((id, userid)): Path<(i64, i64)>,
    Json(body): Json<EnrolBody>,
) -> Result<StatusCode, ServiceError> {
    svc.enrol(CourseId(id), UserId(userid), body.roleid)
        .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unenrol(
    State(svc): State<AppState>,
    Path((id, userid)): Path<(i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    svc.unenrol(CourseId(id), UserId(userid)).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_group(
    State(svc): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<GroupBody>,
) -> Result<StatusCode, ServiceError> {
    svc.upsert_group(&Group {
        id: GroupId(id),
        courseid: CourseId(body.courseid),
        name: body.name,
    })
    .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_group_member(
    State(svc): State<AppState>,
    Path((id, userid)): Path<(i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    svc.add_group_member(GroupId(id), UserId(userid)).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_group_member(
    State(svc): State<AppState>,
    Path((id, userid)): Path<(i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    svc.remove_group_member(GroupId(id), UserId(userid))
        .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn grant_capability(
    State(svc): State<AppState>,
    Path((capability, courseid, userid)): Path<(String, i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    let capability = parse_capability(&capability)?;
    svc.grant_capability(UserId(userid), CourseId(courseid), capability)
        .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_capability(
    State(svc): State<AppState>,
    Path((capability, courseid, userid)): Path<(String, i64, i64)>,
) -> Result<StatusCode, ServiceError> {
    let capability = parse_capability(&capability)?;
    svc.revoke_capability(UserId(userid), CourseId(courseid), capability)
        .map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
