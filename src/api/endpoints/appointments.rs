//! Appointment endpoints. Reads go through the view cache; every write
//! invalidates through the engine's notifier.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::guard::{self, parse_id};
use crate::api::types::*;
use crate::api::AppState;
use crate::auth::Caller;
use crate::cache::{appointment_key, appointment_list_key};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicPath {
    company_id: String,
    clinic_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPath {
    company_id: String,
    clinic_id: String,
    appointment_id: String,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<AppointmentView>>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let Query(q) = query?;
    let filter = q.into_filter()?;
    let key = appointment_list_key(engine.company_id(), clinic_id, &filter.signature());

    let views = state
        .views
        .get_or_set(&key, || async {
            let appointments = engine.list_appointments(clinic_id, &filter)?;
            Ok::<_, ApiError>(appointments.into_iter().map(AppointmentView::from).collect::<Vec<_>>())
        })
        .await?;
    Ok(Json(views))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
    body: Result<Json<CreateAppointmentBody>, JsonRejection>,
) -> Result<(StatusCode, Json<AppointmentView>), ApiError> {
    let (engine, ctx, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let Json(body) = body?;
    let appointment = engine.book(&ctx, clinic_id, body.into_request()?).await?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<AppointmentPath>,
) -> Result<Json<AppointmentView>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.appointment_id, "appointment")?;
    let key = appointment_key(engine.company_id(), id);

    let view = state
        .views
        .get_or_set(&key, || async {
            Ok::<_, ApiError>(AppointmentView::from(engine.get_appointment(clinic_id, id)?))
        })
        .await?;
    // The item key is company-wide; a hit may belong to another clinic.
    if view.clinic_id != clinic_id {
        return Err(ApiError::NotFound(format!("appointment not found: {id}")));
    }
    Ok(Json(view))
}

/// `PATCH .../appointments/:appointmentId`: reschedule.
pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<AppointmentPath>,
    body: Result<Json<UpdateAppointmentBody>, JsonRejection>,
) -> Result<Json<AppointmentView>, ApiError> {
    let (engine, ctx, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.appointment_id, "appointment")?;
    let Json(body) = body?;
    let appointment = engine.reschedule(&ctx, clinic_id, id, body.into()).await?;
    Ok(Json(appointment.into()))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<AppointmentPath>,
) -> Result<StatusCode, ApiError> {
    let (engine, ctx, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.appointment_id, "appointment")?;
    engine.delete_appointment(&ctx, clinic_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<AppointmentPath>,
) -> Result<Json<AppointmentView>, ApiError> {
    let (engine, ctx, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.appointment_id, "appointment")?;
    let appointment = engine.complete(&ctx, clinic_id, id).await?;
    Ok(Json(appointment.into()))
}

pub async fn status(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<AppointmentPath>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> Result<Json<AppointmentView>, ApiError> {
    let (engine, ctx, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.appointment_id, "appointment")?;
    let Json(body) = body?;
    let status = body.parse()?;
    let appointment = engine.set_status(&ctx, clinic_id, id, status).await?;
    Ok(Json(appointment.into()))
}
