//! Company, clinic, staff, patient, group and service endpoints.

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

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyPath {
    company_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicPath {
    company_id: String,
    clinic_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePath {
    company_id: String,
    employee_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicEmployeePath {
    company_id: String,
    clinic_id: String,
    employee_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPath {
    company_id: String,
    clinic_id: String,
    patient_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPath {
    company_id: String,
    clinic_id: String,
    group_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePath {
    company_id: String,
    clinic_id: String,
    service_id: String,
}

// ── Company ─────────────────────────────────────────────────────

/// `POST /company`: the caller becomes the owner.
pub async fn create_company(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    body: Result<Json<CreateCompanyBody>, JsonRejection>,
) -> Result<(StatusCode, Json<CompanyView>), ApiError> {
    let Json(body) = body?;
    let owner_name = body.owner_name.unwrap_or_else(|| {
        caller
            .email
            .split_once('@')
            .map_or(caller.email.as_str(), |(local, _)| local)
            .to_string()
    });
    let (_, company) = state
        .tenants
        .create_company(body.name, &caller.email, owner_name)
        .await?;
    Ok((StatusCode::CREATED, Json(company.into())))
}

pub async fn get_company(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<CompanyPath>,
) -> Result<Json<CompanyView>, ApiError> {
    let (engine, _) = guard::company(&state, &caller, &p.company_id)?;
    let company = engine
        .company()
        .ok_or_else(|| ApiError::NotFound(format!("company not found: {}", p.company_id)))?;
    Ok(Json(company.into()))
}

// ── Clinics ─────────────────────────────────────────────────────

pub async fn create_clinic(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<CompanyPath>,
    body: Result<Json<CreateClinicBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ClinicView>), ApiError> {
    let (engine, ctx) = guard::company(&state, &caller, &p.company_id)?;
    guard::require_owner(&ctx)?;
    let Json(body) = body?;
    let clinic = engine.create_clinic(body.name, body.address).await?;
    Ok((StatusCode::CREATED, Json(clinic.into())))
}

pub async fn list_clinics(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<CompanyPath>,
) -> Result<Json<Vec<ClinicView>>, ApiError> {
    let (engine, _) = guard::company(&state, &caller, &p.company_id)?;
    Ok(Json(engine.list_clinics().into_iter().map(Into::into).collect()))
}

pub async fn get_clinic(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
) -> Result<Json<ClinicView>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let clinic = engine
        .clinic(clinic_id)
        .ok_or_else(|| ApiError::NotFound(format!("clinic not found: {clinic_id}")))?;
    Ok(Json(clinic.into()))
}

// ── Employees ───────────────────────────────────────────────────

pub async fn add_employee(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<CompanyPath>,
    body: Result<Json<CreateEmployeeBody>, JsonRejection>,
) -> Result<(StatusCode, Json<EmployeeView>), ApiError> {
    let (engine, ctx) = guard::company(&state, &caller, &p.company_id)?;
    guard::require_owner(&ctx)?;
    let Json(body) = body?;
    let employee = engine.add_employee(&body.email, body.name).await?;
    Ok((StatusCode::CREATED, Json(employee.into())))
}

pub async fn list_employees(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<CompanyPath>,
) -> Result<Json<Vec<EmployeeView>>, ApiError> {
    let (engine, _) = guard::company(&state, &caller, &p.company_id)?;
    let employees = engine.list_employees().await;
    Ok(Json(employees.into_iter().map(Into::into).collect()))
}

pub async fn remove_employee(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<EmployeePath>,
) -> Result<StatusCode, ApiError> {
    let (engine, ctx) = guard::company(&state, &caller, &p.company_id)?;
    guard::require_owner(&ctx)?;
    let id = parse_id(&p.employee_id, "employee")?;
    engine.remove_employee(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET .../employees/:employeeId/free`: gaps in the employee's schedule.
pub async fn free_time(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicEmployeePath>,
    query: Result<Query<FreeTimeQuery>, QueryRejection>,
) -> Result<Json<Vec<SpanView>>, ApiError> {
    let (engine, _, _) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let employee_id = parse_id(&p.employee_id, "employee")?;
    let Query(q) = query?;
    let min = q.min_minutes.map(|m| i64::from(m) * 60_000);
    let free = engine
        .free_time(employee_id, to_ms(q.from), to_ms(q.to), min)
        .await?;
    Ok(Json(free.into_iter().map(Into::into).collect()))
}

// ── Patients ────────────────────────────────────────────────────

pub async fn create_patient(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
    body: Result<Json<CreatePatientBody>, JsonRejection>,
) -> Result<(StatusCode, Json<PatientView>), ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let Json(body) = body?;
    let patient = engine
        .create_patient(clinic_id, body.name, body.phone, body.credit)
        .await?;
    Ok((StatusCode::CREATED, Json(patient.into())))
}

pub async fn list_patients(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
) -> Result<Json<Vec<PatientView>>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let patients = engine.list_patients(clinic_id).await?;
    Ok(Json(patients.into_iter().map(Into::into).collect()))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<PatientPath>,
) -> Result<Json<PatientView>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.patient_id, "patient")?;
    Ok(Json(engine.patient(clinic_id, id).await?.into()))
}

/// `POST .../patients/:patientId/credit`: record a payment.
pub async fn add_credit(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<PatientPath>,
    body: Result<Json<AddCreditBody>, JsonRejection>,
) -> Result<Json<PatientView>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.patient_id, "patient")?;
    let Json(body) = body?;
    let patient = engine
        .add_credit(clinic_id, id, body.credits, body.amount_cents, body.note)
        .await?;
    Ok(Json(patient.into()))
}

// ── Groups ──────────────────────────────────────────────────────

pub async fn create_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
    body: Result<Json<CreateGroupBody>, JsonRejection>,
) -> Result<(StatusCode, Json<GroupView>), ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let Json(body) = body?;
    let group = engine.create_group(clinic_id, body.name, body.max_size).await?;
    Ok((StatusCode::CREATED, Json(group.into())))
}

pub async fn list_groups(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
) -> Result<Json<Vec<GroupView>>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let groups = engine.list_groups(clinic_id).await?;
    Ok(Json(groups.into_iter().map(Into::into).collect()))
}

pub async fn add_group_member(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<GroupPath>,
    body: Result<Json<AddMemberBody>, JsonRejection>,
) -> Result<Json<GroupView>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let group_id = parse_id(&p.group_id, "group")?;
    let Json(body) = body?;
    let group = engine
        .add_group_member(clinic_id, group_id, body.patient_id)
        .await?;
    Ok(Json(group.into()))
}

// ── Services ────────────────────────────────────────────────────

pub async fn create_service(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
    body: Result<Json<CreateServiceBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceView>), ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let Json(body) = body?;
    let service = engine
        .create_service(clinic_id, body.name, body.duration_minutes, body.price_cents)
        .await?;
    Ok((StatusCode::CREATED, Json(service.into())))
}

pub async fn list_services(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
) -> Result<Json<Vec<ServiceView>>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let services = engine.list_services(clinic_id)?;
    Ok(Json(services.into_iter().map(Into::into).collect()))
}

pub async fn remove_service(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ServicePath>,
) -> Result<StatusCode, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let id = parse_id(&p.service_id, "service")?;
    engine.remove_service(clinic_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Notifications ───────────────────────────────────────────────

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(p): Path<ClinicPath>,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let (engine, _, clinic_id) = guard::clinic(&state, &caller, &p.company_id, &p.clinic_id)?;
    let notifications = engine.list_notifications(clinic_id)?;
    Ok(Json(notifications.into_iter().map(Into::into).collect()))
}
