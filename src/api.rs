use std::{net::IpAddr, sync::Arc};

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use ipnet::IpNet;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    error::NotifyError,
    models::{
        event::{Event, IncomingEvent},
        notification::{IncomingNotification, Notification},
        response::ApiResponse,
        stat::Stat,
        template::{IncomingTemplate, Template},
        validation::{validate_channel_name, validate_incoming_notification},
    },
    services::{
        admission::AdmissionService,
        catalog::{EventStore, TemplateStore},
        stat::StatService,
    },
};

pub struct AppState {
    pub admission: Arc<AdmissionService>,
    pub events: Arc<EventStore>,
    pub templates: Arc<TemplateStore>,
    pub stats: Arc<StatService>,
    pub health_checker: HealthChecker,
    /// Clients whose `X-Real-IP` falls outside this network get 403 on the
    /// `/api/v1` routes. `None` lets every client through.
    pub trusted_subnet: Option<IpNet>,
}

/// Empty or unparseable settings disable the subnet check.
pub fn parse_trusted_subnet(value: &str) -> Option<IpNet> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    match value.parse::<IpNet>() {
        Ok(subnet) => {
            info!(trusted_subnet = %subnet, "Trusted subnet check enabled");
            Some(subnet)
        }
        Err(e) => {
            warn!(trusted_subnet = value, error = %e, "Invalid trusted subnet, check disabled");
            None
        }
    }
}

/// Maps domain errors onto HTTP status codes inside the usual response
/// envelope.
pub struct ApiError(Error);

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<NotifyError>() {
            Some(NotifyError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(NotifyError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Some(NotifyError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Some(NotifyError::AdmissionClosed) | Some(NotifyError::BrokerUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Some(NotifyError::DeliveryRejected { .. }) => StatusCode::BAD_GATEWAY,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, "Request rejected");
        }

        let body = ApiResponse::<()>::error(self.0.to_string(), "Request failed");
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn invalid(err: impl ToString) -> NotifyError {
    NotifyError::InvalidInput(err.to_string())
}

pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(health_check));

    let trusted_routes = Router::new()
        .route("/api/v1/notifications", post(submit_notifications))
        .route("/api/v1/events", get(list_events).post(create_event))
        .route(
            "/api/v1/events/{event_uuid}",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/api/v1/templates", get(list_templates).post(create_template))
        .route(
            "/api/v1/templates/{template_uuid}",
            get(get_template)
                .put(update_template)
                .delete(delete_template),
        )
        .route("/api/v1/stats", get(list_stats))
        .route("/api/v1/stats/person/{person_uuid}", get(stats_by_person))
        .route(
            "/api/v1/stats/notification/{notification_uuid}",
            get(stats_by_notification),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            trusted_subnet_only,
        ));

    Router::new()
        .merge(public_routes)
        .merge(trusted_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn trusted_subnet_only(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(subnet) = state.trusted_subnet else {
        return Ok(next.run(request).await);
    };

    let real_ip = request
        .headers()
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    match real_ip.parse::<IpAddr>() {
        Ok(ip) if subnet.contains(&ip) => Ok(next.run(request).await),
        _ if real_ip.is_empty() => {
            Err(NotifyError::Forbidden("without X-Real-IP".to_string()).into())
        }
        _ => Err(NotifyError::Forbidden(real_ip).into()),
    }
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health_checker.check_all().await;

    let status_code = if report.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(report))
}

async fn submit_notifications(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<IncomingNotification>>, JsonRejection>,
) -> ApiResult<Vec<Uuid>> {
    let Json(batch) = payload.map_err(|e| invalid(e.body_text()))?;

    if batch.is_empty() {
        return Err(invalid("Notification batch cannot be empty").into());
    }

    for incoming in &batch {
        validate_incoming_notification(incoming).map_err(invalid)?;
    }

    let notifications: Vec<Notification> = batch
        .into_iter()
        .map(|incoming| {
            let default_priority = state.events.default_priority(incoming.event_uuid);
            Notification::from_incoming(incoming, default_priority)
        })
        .collect();

    let accepted = state.admission.process_notification(notifications).await?;

    info!(count = accepted.len(), "Notification batch admitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(accepted, "Notifications accepted")),
    ))
}

async fn list_events(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Event>> {
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(state.events.all(), "Events retrieved")),
    ))
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IncomingEvent>, JsonRejection>,
) -> ApiResult<Event> {
    let Json(incoming) = payload.map_err(|e| invalid(e.body_text()))?;
    validate_event(&incoming)?;

    let event = state.events.store(incoming);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(event, "Event created")),
    ))
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_uuid): Path<Uuid>,
) -> ApiResult<Event> {
    let event = state.events.get(event_uuid)?;
    Ok((StatusCode::OK, Json(ApiResponse::success(event, "Event retrieved"))))
}

async fn update_event(
    State(state): State<Arc<AppState>>,
    Path(event_uuid): Path<Uuid>,
    payload: Result<Json<IncomingEvent>, JsonRejection>,
) -> ApiResult<Event> {
    let Json(incoming) = payload.map_err(|e| invalid(e.body_text()))?;
    validate_event(&incoming)?;

    let event = state.events.update(incoming.into_event(event_uuid))?;

    Ok((StatusCode::OK, Json(ApiResponse::success(event, "Event updated"))))
}

fn validate_event(incoming: &IncomingEvent) -> Result<(), NotifyError> {
    if incoming.title.trim().is_empty() {
        return Err(invalid("Event title cannot be empty"));
    }
    for channel in &incoming.notification_channels {
        validate_channel_name(channel).map_err(invalid)?;
    }
    Ok(())
}

async fn delete_event(
    State(state): State<Arc<AppState>>,
    Path(event_uuid): Path<Uuid>,
) -> ApiResult<Uuid> {
    state.events.delete_by_id(event_uuid)?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(event_uuid, "Event deleted")),
    ))
}

async fn list_templates(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Template>> {
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(state.templates.all(), "Templates retrieved")),
    ))
}

async fn create_template(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IncomingTemplate>, JsonRejection>,
) -> ApiResult<Template> {
    let Json(incoming) = payload.map_err(|e| invalid(e.body_text()))?;
    validate_template(&incoming)?;

    let template = state.templates.store(incoming);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(template, "Template created")),
    ))
}

async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(template_uuid): Path<Uuid>,
) -> ApiResult<Template> {
    let template = state.templates.get(template_uuid)?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(template, "Template retrieved")),
    ))
}

async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(template_uuid): Path<Uuid>,
    payload: Result<Json<IncomingTemplate>, JsonRejection>,
) -> ApiResult<Template> {
    let Json(incoming) = payload.map_err(|e| invalid(e.body_text()))?;
    validate_template(&incoming)?;

    let template = state
        .templates
        .update(incoming.into_template(template_uuid))?;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(template, "Template updated")),
    ))
}

fn validate_template(incoming: &IncomingTemplate) -> Result<(), NotifyError> {
    validate_channel_name(&incoming.channel_type).map_err(invalid)?;
    if incoming.body.trim().is_empty() {
        return Err(invalid("Template body cannot be empty"));
    }
    Ok(())
}

async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(template_uuid): Path<Uuid>,
) -> ApiResult<Uuid> {
    state.templates.delete_by_id(template_uuid)?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(template_uuid, "Template deleted")),
    ))
}

async fn list_stats(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Stat>> {
    let stats = state.stats.all().await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(stats, "Stats retrieved"))))
}

async fn stats_by_person(
    State(state): State<Arc<AppState>>,
    Path(person_uuid): Path<Uuid>,
) -> ApiResult<Vec<Stat>> {
    let stats = state.stats.find_by_person_uuid(person_uuid).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(stats, "Stats retrieved"))))
}

async fn stats_by_notification(
    State(state): State<Arc<AppState>>,
    Path(notification_uuid): Path<Uuid>,
) -> ApiResult<Vec<Stat>> {
    let stats = state
        .stats
        .find_by_notification_uuid(notification_uuid)
        .await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(stats, "Stats retrieved"))))
}
