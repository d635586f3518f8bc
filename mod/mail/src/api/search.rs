use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use coursemail_core::ServiceError;

use crate::api::messages::message_json;
use crate::api::{acting_user, usable_course, AppState};
use crate::model::{CourseId, LabelId, MessageId, Role, UserId};
use crate::service::search::MessageSearch;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(search_messages))
        .route("/search/count", get(count_messages))
        .route("/search/courses", get(count_per_course))
        .route("/search/labels", get(count_per_label))
}

#[derive(Deserialize, Default)]
struct SearchQuery {
    courseid: Option<i64>,
    labelid: Option<i64>,
    draft: Option<bool>,
    /// Comma-separated role tokens, e.g. `to,cc`.
    roles: Option<String>,
    unread: Option<bool>,
    starred: Option<bool>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    content: String,
    #[serde(default)]
    sendername: String,
    #[serde(default)]
    recipientname: String,
    #[serde(default)]
    withfilesonly: bool,
    #[serde(default)]
    maxtime: i64,
    startid: Option<i64>,
    stopid: Option<i64>,
    #[serde(default)]
    reverse: bool,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

fn parse_roles(roles: &str) -> Result<Vec<Role>, ServiceError> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            Role::from_token(t).ok_or_else(|| ServiceError::Validation(format!("invalid role: {t}")))
        })
        .collect()
}

impl SearchQuery {
    fn into_search(self, svc: &AppState, user: UserId) -> Result<MessageSearch, ServiceError> {
        let mut search = MessageSearch::new(user);
        if let Some(courseid) = self.courseid {
            usable_course(svc, user, CourseId(courseid))?;
            search.course = Some(CourseId(courseid));
        }
        search.label = self.labelid.map(LabelId);
        search.draft = self.draft;
        if let Some(roles) = &self.roles {
            search.roles = parse_roles(roles)?;
        }
        search.unread = self.unread;
        search.starred = self.starred;
        search.deleted = self.deleted;
        search.content = self.content;
        search.sendername = self.sendername;
        search.recipientname = self.recipientname;
        search.with_files_only = self.withfilesonly;
        search.max_time = self.maxtime;
        search.start = self.startid.map(MessageId);
        search.stop = self.stopid.map(MessageId);
        search.reverse = self.reverse;
        Ok(search)
    }
}

async fn search_messages(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let offset = query.offset;
    let limit = query.limit;
    let search = query.into_search(&svc, user)?;

    let total = svc.count_messages(&search).map_err(ServiceError::from)?;
    let messages = svc
        .search_messages(&search, offset, limit)
        .map_err(ServiceError::from)?;
    let mut items = Vec::with_capacity(messages.len());
    for message in &messages {
        items.push(message_json(&svc, user, message)?);
    }
    Ok(Json(json!({"items": items, "total": total})))
}

async fn count_messages(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let search = query.into_search(&svc, user)?;
    let total = svc.count_messages(&search).map_err(ServiceError::from)?;
    Ok(Json(json!({"total": total})))
}

async fn count_per_course(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let search = query.into_search(&svc, user)?;
    let counts = svc
        .count_messages_per_course(&search)
        .map_err(ServiceError::from)?;
    let items: Vec<_> = counts
        .iter()
        .map(|(courseid, count)| json!({"courseid": courseid, "count": count}))
        .collect();
    Ok(Json(json!({"items": items})))
}

async fn count_per_label(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let search = query.into_search(&svc, user)?;
    let counts = svc
        .count_messages_per_label(&search)
        .map_err(ServiceError::from)?;
    let items: Vec<_> = counts
        .iter()
        .map(|(labelid, count)| json!({"labelid": labelid, "count": count}))
        .collect();
    Ok(Json(json!({"items": items})))
}
