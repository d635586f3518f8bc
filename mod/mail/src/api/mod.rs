mod directory;
mod labels;
mod messages;
mod search;
mod users;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;

use coursemail_core::ServiceError;

use crate::model::{CourseId, UserId};
use crate::service::MailService;

/// Shared application state.
pub type AppState = Arc<MailService>;

/// Build the complete mail API router.
///
/// All routes are relative — the caller nests them under `/mail`.
pub fn build_router(svc: Arc<MailService>) -> Router {
    let api = Router::new()
        .merge(directory::routes())
        .merge(labels::routes())
        .merge(messages::routes())
        .merge(search::routes())
        .merge(users::routes());

    Router::new().nest("/mail", api).with_state(svc)
}

/// The user a request acts as.
///
/// The hosting platform authenticates requests and forwards the
/// identity in the X-User-Id header; this service trusts it.
pub(crate) fn acting_user(headers: &HeaderMap) -> Result<UserId, ServiceError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(UserId)
        .ok_or_else(|| {
            ServiceError::PermissionDenied("missing or invalid X-User-Id header".into())
        })
}

/// Checks that the user may use mail in the course.
pub(crate) fn usable_course(
    svc: &MailService,
    user: UserId,
    courseid: CourseId,
) -> Result<(), ServiceError> {
    let course = svc.fetch_course(courseid).map_err(ServiceError::from)?;
    if !svc.can_use_mail(user, &course).map_err(ServiceError::from)? {
        return Err(ServiceError::PermissionDenied(format!(
            "no mail access to course {courseid}"
        )));
    }
    Ok(())
}
