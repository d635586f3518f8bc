use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use coursemail_core::ServiceError;

use crate::api::{acting_user, AppState};
use crate::model::{Color, LabelId};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/labels", get(list_labels).post(create_label))
        .route("/labels/{id}", axum::routing::put(update_label).delete(delete_label))
}

#[derive(Deserialize)]
struct LabelBody {
    name: String,
    #[serde(default)]
    color: String,
}

fn parse_color(value: &str) -> Result<Color, ServiceError> {
    Color::from_str(value)
        .ok_or_else(|| ServiceError::Validation(format!("invalid label color: {value}")))
}

async fn list_labels(
    State(svc): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let labels = svc.fetch_labels(user).map_err(ServiceError::from)?;
    Ok(Json(serde_json::json!({"items": labels})))
}

async fn create_label(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LabelBody>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), ServiceError> {
    let user = acting_user(&headers)?;
    let color = parse_color(&body.color)?;
    let label = svc
        .create_label(user, &body.name, color)
        .map_err(ServiceError::from)?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::to_value(label).map_err(|e| ServiceError::Internal(e.to_string()))?),
    ))
}

async fn update_label(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<LabelBody>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let user = acting_user(&headers)?;
    let color = parse_color(&body.color)?;
    let label = svc
        .update_label(user, LabelId(id), &body.name, color)
        .map_err(ServiceError::from)?;
    Ok(Json(
        serde_json::to_value(label).map_err(|e| ServiceError::Internal(e.to_string()))?,
    ))
}

async fn delete_label(
    State(svc): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<axum::http::StatusCode, ServiceError> {
    let user = acting_user(&headers)?;
    svc.delete_label(user, LabelId(id)).map_err(ServiceError::from)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
