use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Weekday};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::identity::{CurrentUser, Role};
use crate::model::*;
use crate::observability;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/services", get(list_services).post(define_service))
        .route("/services/:id/update", post(update_service))
        .route("/services/:id/trainers", get(trainers_for_service))
        .route("/trainers", get(list_trainers).post(register_trainer))
        .route("/trainers/:id/update", post(update_trainer))
        .route("/trainers/:id/shifts", post(add_shift))
        .route("/trainers/:id/booked-hours", get(booked_hours))
        .route("/trainers/:id/slots", get(available_slots))
        .route("/shifts/:id/deactivate", post(deactivate_shift))
        .route("/appointments", get(list_appointments).post(book_appointment))
        .route("/appointments/:id/approve", post(approve_appointment))
        .route("/appointments/:id/cancel", post(cancel_appointment))
        .route("/appointments/:id/complete", post(complete_appointment))
        .route("/appointments/:id/no-show", post(mark_no_show))
        .with_state(engine)
}

// ── Identity extraction ──────────────────────────────────

/// The gateway terminates authentication and forwards the caller's
/// identity in headers. A request without them is unauthenticated.
#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        let id = header("x-user-id")
            .and_then(|v| Ulid::from_string(&v).ok())
            .ok_or(ApiError::MissingIdentity)?;
        let display_name = header("x-user-name").ok_or(ApiError::MissingIdentity)?;
        let roles = header("x-user-roles")
            .map(|v| v.split(',').filter_map(Role::parse).collect())
            .unwrap_or_default();

        Ok(CurrentUser { id, display_name, roles })
    }
}

// ── Error mapping ────────────────────────────────────────

pub enum ApiError {
    Engine(EngineError),
    BadRequest(&'static str),
    MissingIdentity,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Engine(e) => {
                let status = match e {
                    EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                    EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    EngineError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    EngineError::Conflict(_) | EngineError::AlreadyExists(_) => {
                        StatusCode::CONFLICT
                    }
                    EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
                    EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, (*msg).to_owned()),
            ApiError::MissingIdentity => {
                (StatusCode::UNAUTHORIZED, "missing identity headers".to_owned())
            }
        };
        if status.is_server_error() {
            tracing::error!(%status, %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn track(route: &'static str, status: &'static str) {
    metrics::counter!(observability::REQUESTS_TOTAL, "route" => route, "status" => status)
        .increment(1);
}

fn parse_date(s: &str) -> Result<Date, ApiError> {
    Date::parse(s, DATE_FORMAT).map_err(|_| ApiError::BadRequest("invalid date, expected YYYY-MM-DD"))
}

fn parse_weekday(s: &str) -> Result<Weekday, ApiError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "monday" => Ok(Weekday::Monday),
        "tuesday" => Ok(Weekday::Tuesday),
        "wednesday" => Ok(Weekday::Wednesday),
        "thursday" => Ok(Weekday::Thursday),
        "friday" => Ok(Weekday::Friday),
        "saturday" => Ok(Weekday::Saturday),
        "sunday" => Ok(Weekday::Sunday),
        _ => Err(ApiError::BadRequest("invalid weekday")),
    }
}

fn parse_time(s: &str) -> Result<Minutes, ApiError> {
    parse_hhmm(s).ok_or(ApiError::BadRequest("invalid time, expected HH:MM"))
}

// ── DTOs ─────────────────────────────────────────────────

#[derive(Serialize)]
struct ServiceDto {
    id: Ulid,
    name: String,
    duration_minutes: Minutes,
    price_cents: i64,
    active: bool,
}

impl From<Service> for ServiceDto {
    fn from(s: Service) -> Self {
        Self {
            id: s.id,
            name: s.name,
            duration_minutes: s.duration_minutes,
            price_cents: s.price_cents,
            active: s.active,
        }
    }
}

#[derive(Serialize)]
struct TrainerDto {
    id: Ulid,
    name: String,
    active: bool,
}

#[derive(Serialize)]
struct SlotDto {
    start: String,
    is_full: bool,
}

#[derive(Serialize)]
struct BookedHoursDto {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct AppointmentDto {
    id: Ulid,
    trainer_id: Ulid,
    member_id: Ulid,
    service_id: Ulid,
    date: String,
    start: String,
    end: String,
    status: &'static str,
    total_price_cents: i64,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    trainer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approved_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancellation_reason: Option<String>,
}

fn appointment_dto(a: Appointment, names: Option<(String, String)>) -> AppointmentDto {
    let (trainer_name, service_name) = match names {
        Some((t, s)) => (Some(t), Some(s)),
        None => (None, None),
    };
    AppointmentDto {
        id: a.id,
        trainer_id: a.trainer_id,
        member_id: a.member_id,
        service_id: a.service_id,
        date: a.date.format(DATE_FORMAT).unwrap_or_default(),
        start: format_hhmm(a.slot.start),
        end: format_hhmm(a.slot.end),
        status: a.status.label(),
        total_price_cents: a.total_price_cents,
        created_at: a.created_at.format(&Rfc3339).unwrap_or_default(),
        trainer_name,
        service_name,
        approved_by: a.approved_by,
        approved_at: a.approved_at.and_then(|t| t.format(&Rfc3339).ok()),
        cancellation_reason: a.cancellation_reason,
    }
}

// ── Directory handlers ───────────────────────────────────

async fn list_services(State(engine): State<Arc<Engine>>) -> Json<Vec<ServiceDto>> {
    track("list_services", "ok");
    Json(engine.list_services().into_iter().map(Into::into).collect())
}

#[derive(Deserialize)]
struct DefineServiceRequest {
    name: String,
    duration_minutes: Minutes,
    price_cents: i64,
}

async fn define_service(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Json(req): Json<DefineServiceRequest>,
) -> Result<(StatusCode, Json<ServiceDto>), ApiError> {
    user.require_admin()?;
    let service = engine
        .define_service(Ulid::new(), req.name, req.duration_minutes, req.price_cents)
        .await?;
    track("define_service", "ok");
    Ok((StatusCode::CREATED, Json(service.into())))
}

#[derive(Deserialize)]
struct UpdateServiceRequest {
    name: String,
    duration_minutes: Minutes,
    price_cents: i64,
    active: bool,
}

async fn update_service(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
    Json(req): Json<UpdateServiceRequest>,
) -> Result<Json<ServiceDto>, ApiError> {
    user.require_admin()?;
    let service = engine
        .update_service(id, req.name, req.duration_minutes, req.price_cents, req.active)
        .await?;
    track("update_service", "ok");
    Ok(Json(service.into()))
}

async fn trainers_for_service(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Ulid>,
) -> Json<Vec<TrainerDto>> {
    track("trainers_for_service", "ok");
    let trainers = engine
        .trainers_for_service(id)
        .await
        .into_iter()
        .map(|t| TrainerDto { id: t.id, name: t.name, active: t.active })
        .collect();
    Json(trainers)
}

async fn list_trainers(State(engine): State<Arc<Engine>>) -> Json<Vec<TrainerDto>> {
    track("list_trainers", "ok");
    let trainers = engine
        .list_trainers()
        .await
        .into_iter()
        .map(|t| TrainerDto { id: t.id, name: t.name, active: t.active })
        .collect();
    Json(trainers)
}

#[derive(Deserialize)]
struct RegisterTrainerRequest {
    name: String,
    #[serde(default)]
    service_ids: Vec<Ulid>,
}

async fn register_trainer(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Json(req): Json<RegisterTrainerRequest>,
) -> Result<(StatusCode, Json<TrainerDto>), ApiError> {
    user.require_admin()?;
    let id = Ulid::new();
    engine.register_trainer(id, req.name.clone(), req.service_ids).await?;
    track("register_trainer", "ok");
    Ok((StatusCode::CREATED, Json(TrainerDto { id, name: req.name, active: true })))
}

#[derive(Deserialize)]
struct UpdateTrainerRequest {
    name: String,
    active: bool,
    #[serde(default)]
    service_ids: Vec<Ulid>,
}

async fn update_trainer(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
    Json(req): Json<UpdateTrainerRequest>,
) -> Result<StatusCode, ApiError> {
    user.require_admin()?;
    engine.update_trainer(id, req.name, req.active, req.service_ids).await?;
    track("update_trainer", "ok");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AddShiftRequest {
    weekday: String,
    start: String,
    end: String,
}

#[derive(Serialize)]
struct ShiftDto {
    id: Ulid,
    weekday: String,
    start: String,
    end: String,
    active: bool,
}

async fn add_shift(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(trainer_id): Path<Ulid>,
    Json(req): Json<AddShiftRequest>,
) -> Result<(StatusCode, Json<ShiftDto>), ApiError> {
    user.require_admin()?;
    let weekday = parse_weekday(&req.weekday)?;
    let start = parse_time(&req.start)?;
    let end = parse_time(&req.end)?;
    let shift = engine
        .add_shift(Ulid::new(), trainer_id, weekday, start, end)
        .await?;
    track("add_shift", "ok");
    Ok((
        StatusCode::CREATED,
        Json(ShiftDto {
            id: shift.id,
            weekday: req.weekday.to_ascii_lowercase(),
            start: format_hhmm(shift.slot.start),
            end: format_hhmm(shift.slot.end),
            active: shift.active,
        }),
    ))
}

async fn deactivate_shift(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
) -> Result<StatusCode, ApiError> {
    user.require_admin()?;
    engine.deactivate_shift(id).await?;
    track("deactivate_shift", "ok");
    Ok(StatusCode::NO_CONTENT)
}

// ── Availability handlers ────────────────────────────────

#[derive(Deserialize)]
struct DateQuery {
    date: String,
}

async fn booked_hours(
    State(engine): State<Arc<Engine>>,
    Path(trainer_id): Path<Ulid>,
    Query(q): Query<DateQuery>,
) -> Result<Json<Vec<BookedHoursDto>>, ApiError> {
    let date = parse_date(&q.date)?;
    track("booked_hours", "ok");
    let booked = engine
        .booked_hours(trainer_id, date)
        .await
        .into_iter()
        .map(|s| BookedHoursDto {
            start: format_hhmm(s.start),
            end: format_hhmm(s.end),
        })
        .collect();
    Ok(Json(booked))
}

#[derive(Deserialize)]
struct SlotsQuery {
    service_id: Ulid,
    date: String,
}

async fn available_slots(
    State(engine): State<Arc<Engine>>,
    Path(trainer_id): Path<Ulid>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<Vec<SlotDto>>, ApiError> {
    let date = parse_date(&q.date)?;
    track("available_slots", "ok");
    let slots = engine
        .available_slots(trainer_id, q.service_id, date)
        .await
        .into_iter()
        .map(|s| SlotDto { start: format_hhmm(s.start), is_full: s.is_full })
        .collect();
    Ok(Json(slots))
}

// ── Appointment handlers ─────────────────────────────────

async fn list_appointments(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
) -> Json<Vec<AppointmentDto>> {
    track("list_appointments", "ok");
    let views = engine.list_appointments(&user).await;
    Json(
        views
            .into_iter()
            .map(|v| appointment_dto(v.appointment, Some((v.trainer_name, v.service_name))))
            .collect(),
    )
}

#[derive(Deserialize)]
struct BookRequest {
    trainer_id: Ulid,
    service_id: Ulid,
    date: String,
    start: String,
}

async fn book_appointment(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Json(req): Json<BookRequest>,
) -> Result<(StatusCode, Json<AppointmentDto>), ApiError> {
    let date = parse_date(&req.date)?;
    let start = parse_time(&req.start)?;
    let appointment = engine
        .book_appointment(
            Ulid::new(),
            req.trainer_id,
            user.id,
            req.service_id,
            date,
            start,
            OffsetDateTime::now_utc(),
        )
        .await?;
    track("book_appointment", "ok");
    Ok((StatusCode::CREATED, Json(appointment_dto(appointment, None))))
}

async fn approve_appointment(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
) -> Result<Json<AppointmentDto>, ApiError> {
    let appointment = engine
        .approve_appointment(id, &user, OffsetDateTime::now_utc())
        .await?;
    track("approve_appointment", "ok");
    Ok(Json(appointment_dto(appointment, None)))
}

#[derive(Deserialize, Default)]
struct CancelRequest {
    reason: Option<String>,
}

async fn cancel_appointment(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<AppointmentDto>, ApiError> {
    // Members cancel their own appointments; administrators cancel any.
    if !user.is_admin() {
        let owner = engine
            .find_appointment(id)
            .await
            .ok_or(EngineError::NotFound(id))?
            .member_id;
        if owner != user.id {
            return Err(EngineError::Unauthorized("not your appointment").into());
        }
    }
    let reason = body.and_then(|Json(r)| r.reason);
    let appointment = engine
        .cancel_appointment(id, reason, OffsetDateTime::now_utc())
        .await?;
    track("cancel_appointment", "ok");
    Ok(Json(appointment_dto(appointment, None)))
}

async fn complete_appointment(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
) -> Result<Json<AppointmentDto>, ApiError> {
    user.require_admin()?;
    let appointment = engine
        .complete_appointment(id, OffsetDateTime::now_utc())
        .await?;
    track("complete_appointment", "ok");
    Ok(Json(appointment_dto(appointment, None)))
}

async fn mark_no_show(
    State(engine): State<Arc<Engine>>,
    user: CurrentUser,
    Path(id): Path<Ulid>,
) -> Result<Json<AppointmentDto>, ApiError> {
    user.require_admin()?;
    let appointment = engine.mark_no_show(id, OffsetDateTime::now_utc()).await?;
    track("mark_no_show", "ok");
    Ok(Json(appointment_dto(appointment, None)))
}
