use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use coursemail_core::ServiceError;

use crate::api::{acting_user, usable_course, AppState};
use crate::model::{
    CourseId, DeletedStatus, LabelId, Message, MessageData, MessageId, Participant, Role,
    TextFormat, UserId,
};
use crate::service::MailService;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/messages", post(create_message))
        .route("/messages/{id}", get(get_message).patch(update_message))
        .route("/messages/{id}/send", post(send_message))
        .route("/messages/{id}/reply", post(reply_message))
        .route("/messages/{id}/forward", post(forward_message))
        .route("/messages/{id}/unread", put(set_unread))
        .route("/messages/{id}/starred", put(set_starred))
        .route("/messages/{id}/deleted", put(set_deleted))
        .route("/messages/{id}/labels", put(set_labels))
        .route("/messages/{id}/references", get(get_references))
        .route("/messages/{id}/files/{filename}", get(download_file))
        .route("/files/{draftitemid}/{filename}", put(upload_file))
        .route("/trash", axum::routing::delete(empty_trash))
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ── Body types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateBody {
    courseid: i64,
}

#[derive(Deserialize, Default)]
struct DraftBody {
    courseid: Option<i64>,
    #[serde(default)]
    to: Vec<i64>,
    #[serde(default)]
    cc: Vec<i64>,
    #[serde(default)]
    bcc: Vec<i64>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    content: String,
    format: Option<TextFormat>,
    #[serde(default)]
    draftitemid: i64,
}

#[derive(Deserialize)]
struct FlagBody {
    value: bool,
}

#[derive(Deserialize)]
struct DeletedBody {
    status: i64,
}

#[derive(Deserialize)]
struct LabelsBody {
    labels: Vec<i64>,
}

#[derive(Deserialize)]
struct ReplyBody {
    #[serde(default)]
    all: bool,
}

#[derive(Deserialize, Default)]
struct TrashBody {
    courseids: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct ReferencesQuery {
    #[serde(default)]
    forward: bool,
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Draft the user may edit. Conflated to not-found otherwise.
fn editable_message(
    svc: &MailService,
    user: UserId,
    id: MessageId,
) -> Result<Message, ServiceError> {
    let message = svc.fetch_message_for(user, id).map_err(ServiceError::from)?;
    if !svc.can_edit_message(user, &message).map_err(ServiceError::from)? {
        return Err(ServiceError::NotFound(format!("message {id}")));
    }
    Ok(message)
}

fn apply_body(data: &mut MessageData, body: &DraftBody) {
    if let Some(courseid) = body.courseid {
        data.course = CourseId(courseid);
    }
    data.to = body.to.iter().copied().map(UserId).collect();
    data.cc = body.cc.iter().copied().map(UserId).collect();
    data.bcc = body.bcc.iter().copied().map(UserId).collect();
    data.subject = body.subject.clone();
    data.content = body.content.clone();
    if let Some(format) = body.format {
        data.format = format;
    }
    data.draftitemid = body.draftitemid;
    data.time = now();
}

fn user_json(participant: &Participant) -> serde_json::Value {
    json!({
        "id": participant.user.id,
        "firstname": participant.user.firstname,
        "lastname": participant.user.lastname,
        "fullname": participant.user.fullname(),
    })
}

/// The filename is the key's last segment.
fn filename_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Icon hint for a mime type, for clients that render file lists.
fn icon_name(mimetype: &str) -> &'static str {
    match mimetype.split('/').next().unwrap_or("") {
        "image" => "image",
        "audio" => "audio",
        "video" => "video",
        "text" => "text",
        _ if mimetype == "application/pdf" => "pdf",
        _ if mimetype == "application/zip" => "archive",
        _ => "document",
    }
}

/// One message as the viewer sees it. BCC recipients are listed only
/// for the sender; a BCC viewer sees just themself.
pub(crate) fn message_json(
    svc: &MailService,
    viewer: UserId,
    message: &Message,
) -> Result<serde_json::Value, ServiceError> {
    let own = message
        .participants
        .get(&viewer)
        .ok_or_else(|| ServiceError::NotFound(format!("message {}", message.id)))?;

    let role_of = |role: Role| -> Vec<serde_json::Value> {
        message
            .participants
            .values()
            .filter(|p| p.role == role)
            .map(user_json)
            .collect()
    };
    let bcc = if own.role == Role::From {
        role_of(Role::Bcc)
    } else if own.role == Role::Bcc {
        vec![user_json(own)]
    } else {
        Vec::new()
    };

    let mut attachments = Vec::new();
    if message.attachments > 0 {
        for meta in svc.message_files(message).map_err(ServiceError::from)? {
            let filename = filename_of(&meta.key);
            let mimetype = mime_guess::from_path(filename)
                .first_or_octet_stream()
                .to_string();
            attachments.push(json!({
                "filepath": "/",
                "filename": filename,
                "filesize": meta.size,
                "mimetype": mimetype,
                "iconname": icon_name(&mimetype),
                "downloadurl": format!("/mail/messages/{}/files/{}", message.id, filename),
            }));
        }
    }

    Ok(json!({
        "id": message.id,
        "courseid": message.course,
        "subject": message.subject,
        "content": message.content,
        "format": message.format,
        "draft": message.draft,
        "time": message.time,
        "attachments": attachments,
        "sender": user_json(message.sender()),
        "to": role_of(Role::To),
        "cc": role_of(Role::Cc),
        "bcc": bcc,
        "role": own.role.token(),
        "unread": own.unread,
        "starred": own.starred,
        "deleted": own.deleted.as_i64(),
        "labels": own.labels,
        "references": message.references,
    }))
}

// ── Handlers ────────────────────────────────────────────────────────

async fn create_message(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServiceError> {
    let user = acting_user(&headers)?;
    let course = CourseId(body.courseid);
    usable_course(&svc, user, course)?;

    let data = MessageData::new(user, course, now());
    let message = svc.create_message(&data).map_err(ServiceError::from)?;
    Ok((StatusCode::CREATED, Json(message_json(&svc, user, &message)?)))
}

async fn get_message(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    Ok(Json(message_json(&svc, user, &message)?))
}

async fn update_message(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<DraftBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let message = editable_message(&svc, user, MessageId(id))?;
    if let Some(courseid) = body.courseid {
        usable_course(&svc, user, CourseId(courseid))?;
    }

    let mut data = MessageData::draft(&message);
    apply_body(&mut data, &body);
    let message = svc.update_message(&message, &data).map_err(ServiceError::from)?;
    Ok(Json(message_json(&svc, user, &message)?))
}

async fn send_message(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let message = editable_message(&svc, user, MessageId(id))?;
    let message = svc.send_message(&message, now()).map_err(ServiceError::from)?;
    Ok(Json(message_json(&svc, user, &message)?))
}

async fn reply_message(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<ReplyBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    if message.draft {
        return Err(ServiceError::Validation("cannot reply to a draft".into()));
    }
    if body.all && message.role(user) == Some(Role::Bcc) {
        return Err(ServiceError::Validation(
            "bcc recipients cannot reply to all".into(),
        ));
    }
    usable_course(&svc, user, message.course)?;

    let data = MessageData::reply(&message, user, body.all, now());
    let reply = svc.create_message(&data).map_err(ServiceError::from)?;
    Ok((StatusCode::CREATED, Json(message_json(&svc, user, &reply)?)))
}

async fn forward_message(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    if message.draft {
        return Err(ServiceError::Validation("cannot forward a draft".into()));
    }
    usable_course(&svc, user, message.course)?;

    let data = MessageData::forward(&message, user, now());
    let forward = svc.create_message(&data).map_err(ServiceError::from)?;
    Ok((StatusCode::CREATED, Json(message_json(&svc, user, &forward)?)))
}

async fn set_unread(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<FlagBody>,
) -> Result<StatusCode, ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    svc.set_unread(&message, user, body.value).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_starred(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<FlagBody>,
) -> Result<StatusCode, ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    svc.set_starred(&message, user, body.value).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_deleted(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<DeletedBody>,
) -> Result<StatusCode, ServiceError> {
    let user = acting_user(&headers)?;
    let status = DeletedStatus::from_i64(body.status)
        .ok_or_else(|| ServiceError::Validation(format!("invalid deleted status: {}", body.status)))?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    svc.set_deleted(&message, user, status).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_labels(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<LabelsBody>,
) -> Result<StatusCode, ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc
        .fetch_message_for(user, MessageId(id))
        .map_err(ServiceError::from)?;
    let labels: Vec<LabelId> = body.labels.iter().copied().map(LabelId).collect();
    // Ownership check before the engine asserts it.
    for &label in &labels {
        svc.fetch_label(user, label).map_err(ServiceError::from)?;
    }
    svc.set_labels(&message, user, &labels).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_references(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ReferencesQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    svc.fetch_message_for(user, MessageId(id)).map_err(ServiceError::from)?;

    let mut items = Vec::new();
    for reference in svc
        .fetch_references(MessageId(id), query.forward)
        .map_err(ServiceError::from)?
    {
        if svc.can_view_message(user, &reference).map_err(ServiceError::from)? {
            items.push(message_json(&svc, user, &reference)?);
        }
    }
    Ok(Json(json!({"items": items})))
}

async fn download_file(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path((id, filename)): Path<(i64, String)>,
) -> Result<Response, ServiceError> {
    let user = acting_user(&headers)?;
    let message = svc.fetch_message(MessageId(id)).map_err(ServiceError::from)?;
    if !svc.can_view_files(user, &message).map_err(ServiceError::from)? {
        return Err(ServiceError::NotFound(format!("message {id}")));
    }

    let data = svc
        .fetch_file(&message, &filename)
        .map_err(ServiceError::from)?
        .ok_or_else(|| ServiceError::NotFound(format!("file {filename}")))?;
    let mimetype = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();
    Ok((
        [
            (header::CONTENT_TYPE, mimetype),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        data,
    )
        .into_response())
}

async fn upload_file(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path((draftitemid, filename)): Path<(i64, String)>,
    body: Bytes,
) -> Result<StatusCode, ServiceError> {
    acting_user(&headers)?;
    if draftitemid <= 0 {
        return Err(ServiceError::Validation("invalid draft item id".into()));
    }
    if filename.contains('/') || filename.contains("..") {
        return Err(ServiceError::Validation(format!("invalid filename: {filename}")));
    }
    svc.stage_file(draftitemid, &filename, &body).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn empty_trash(
    State(svc): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<TrashBody>>,
) -> Result<StatusCode, ServiceError> {
    let user = acting_user(&headers)?;
    let courses: Vec<CourseId> = match body.and_then(|Json(b)| b.courseids) {
        Some(ids) => ids.into_iter().map(CourseId).collect(),
        None => svc
            .fetch_courses(user)
            .map_err(ServiceError::from)?
            .into_iter()
            .map(|c| c.id)
            .collect(),
    };
    svc.empty_trash(user, &courses).map_err(ServiceError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
