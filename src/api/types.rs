//! Request and response bodies. JSON fields are camelCase, timestamps RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::error::ApiError;
use crate::engine::{AppointmentFilter, BookingRequest, ReschedulePatch};
use crate::model::*;

pub fn to_ms(t: DateTime<Utc>) -> Ms {
    t.timestamp_millis()
}

pub fn from_ms(ms: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn role_str(role: EmployeeRole) -> &'static str {
    match role {
        EmployeeRole::Owner => "owner",
        EmployeeRole::Staff => "staff",
    }
}

// ── Directory ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCompanyBody {
    pub name: String,
    /// Defaults to the local part of the caller's email.
    pub owner_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyView {
    pub id: Ulid,
    pub name: String,
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
}

impl From<Company> for CompanyView {
    fn from(c: Company) -> Self {
        Self {
            id: c.id,
            name: c.name,
            owner_email: c.owner_email,
            created_at: from_ms(c.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateClinicBody {
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicView {
    pub id: Ulid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Clinic> for ClinicView {
    fn from(c: Clinic) -> Self {
        Self {
            id: c.id,
            name: c.name,
            address: c.address,
            created_at: from_ms(c.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeBody {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub role: &'static str,
    pub created_at: DateTime<Utc>,
}

impl From<Employee> for EmployeeView {
    fn from(e: Employee) -> Self {
        Self {
            id: e.id,
            email: e.email,
            name: e.name,
            role: role_str(e.role),
            created_at: from_ms(e.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePatientBody {
    pub name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub credit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub credits: u32,
    pub amount_cents: i64,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientView {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    pub credit: u32,
    pub payment_history: Vec<PaymentView>,
    pub created_at: DateTime<Utc>,
}

impl From<Patient> for PatientView {
    fn from(p: Patient) -> Self {
        Self {
            id: p.id,
            clinic_id: p.clinic_id,
            name: p.name,
            phone: p.phone,
            credit: p.credit,
            payment_history: p
                .payment_history
                .into_iter()
                .map(|pay| PaymentView {
                    credits: pay.credits,
                    amount_cents: pay.amount_cents,
                    note: pay.note,
                    at: from_ms(pay.at),
                })
                .collect(),
            created_at: from_ms(p.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCreditBody {
    pub credits: u32,
    #[serde(default)]
    pub amount_cents: i64,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupBody {
    pub name: String,
    pub max_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberBody {
    pub patient_id: Ulid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub name: String,
    pub member_ids: Vec<Ulid>,
    pub max_size: u32,
    pub created_at: DateTime<Utc>,
}

impl From<Group> for GroupView {
    fn from(g: Group) -> Self {
        Self {
            id: g.id,
            clinic_id: g.clinic_id,
            name: g.name,
            member_ids: g.member_ids,
            max_size: g.max_size,
            created_at: from_ms(g.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceBody {
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub price_cents: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub price_cents: i64,
}

impl From<Service> for ServiceView {
    fn from(s: Service) -> Self {
        Self {
            id: s.id,
            clinic_id: s.clinic_id,
            name: s.name,
            duration_minutes: s.duration_minutes,
            price_cents: s.price_cents,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub appointment_id: Ulid,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Ulid>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        let (patient_id, group_id) = split_subject(n.recipient);
        Self {
            id: n.id,
            clinic_id: n.clinic_id,
            appointment_id: n.appointment_id,
            kind: "reminder",
            patient_id,
            group_id,
            message: n.message,
            created_at: from_ms(n.created_at),
        }
    }
}

fn split_subject(subject: Subject) -> (Option<Ulid>, Option<Ulid>) {
    match subject {
        Subject::Individual { patient_id } => (Some(patient_id), None),
        Subject::Group { group_id } => (None, Some(group_id)),
    }
}

// ── Appointments ─────────────────────────────────────────────────

/// Exactly one of `patientId` / `groupId`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentBody {
    pub patient_id: Option<Ulid>,
    pub group_id: Option<Ulid>,
    pub employee_id: Ulid,
    pub service_id: Option<Ulid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CreateAppointmentBody {
    pub fn into_request(self) -> Result<BookingRequest, ApiError> {
        let subject = match (self.patient_id, self.group_id) {
            (Some(patient_id), None) => Subject::Individual { patient_id },
            (None, Some(group_id)) => Subject::Group { group_id },
            (Some(_), Some(_)) => {
                return Err(ApiError::InvalidInput("give either patientId or groupId, not both".into()));
            }
            (None, None) => return Err(ApiError::InvalidInput("patientId or groupId is required".into())),
        };
        Ok(BookingRequest {
            subject,
            employee_id: self.employee_id,
            service_id: self.service_id,
            start: to_ms(self.start),
            end: to_ms(self.end),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentBody {
    pub employee_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl From<UpdateAppointmentBody> for ReschedulePatch {
    fn from(b: UpdateAppointmentBody) -> Self {
        Self {
            employee_id: b.employee_id,
            service_id: b.service_id,
            start: b.start.map(to_ms),
            end: b.end.map(to_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

impl StatusBody {
    pub fn parse(&self) -> Result<AppointmentStatus, ApiError> {
        AppointmentStatus::parse(&self.status)
            .ok_or_else(|| ApiError::InvalidInput(format!("unknown status {:?}", self.status)))
    }
}

/// Cached as JSON, so it round-trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: Ulid,
    pub company_id: Ulid,
    pub clinic_id: Ulid,
    pub appointment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Ulid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Ulid>,
    pub employee_id: Ulid,
    pub service_id: Option<Ulid>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: String,
    pub charged: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Appointment> for AppointmentView {
    fn from(a: Appointment) -> Self {
        let appointment_type = match a.appointment_type() {
            AppointmentType::Individual => "individual",
            AppointmentType::Group => "group",
        };
        let (patient_id, group_id) = split_subject(a.subject);
        Self {
            id: a.id,
            company_id: a.company_id,
            clinic_id: a.clinic_id,
            appointment_type: appointment_type.to_string(),
            patient_id,
            group_id,
            employee_id: a.employee_id,
            service_id: a.service_id,
            start: from_ms(a.span.start),
            end: from_ms(a.span.end),
            status: a.status.as_str().to_string(),
            charged: a.charged,
            created_by: a.created_by,
            created_at: from_ms(a.created_at),
            updated_at: from_ms(a.updated_at),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub employee_id: Option<Ulid>,
    pub patient_id: Option<Ulid>,
    pub group_id: Option<Ulid>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ListQuery {
    pub fn into_filter(self) -> Result<AppointmentFilter, ApiError> {
        let status = match self.status {
            Some(s) => Some(
                AppointmentStatus::parse(&s)
                    .ok_or_else(|| ApiError::InvalidInput(format!("unknown status {s:?}")))?,
            ),
            None => None,
        };
        Ok(AppointmentFilter {
            employee_id: self.employee_id,
            patient_id: self.patient_id,
            group_id: self.group_id,
            status,
            from: self.from.map(to_ms),
            to: self.to.map(to_ms),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FreeTimeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub min_minutes: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SpanView {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl From<Span> for SpanView {
    fn from(s: Span) -> Self {
        Self {
            start: from_ms(s.start),
            end: from_ms(s.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> CreateAppointmentBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn subject_must_be_exactly_one() {
        let (p, g, e) = (Ulid::new(), Ulid::new(), Ulid::new());
        let base = |extra: serde_json::Value| {
            let mut v = serde_json::json!({
                "employeeId": e.to_string(),
                "start": "2026-01-01T10:00:00Z",
                "end": "2026-01-01T10:30:00Z",
            });
            v.as_object_mut().unwrap().extend(extra.as_object().unwrap().clone());
            body(v)
        };

        let req = base(serde_json::json!({ "patientId": p.to_string() })).into_request().unwrap();
        assert_eq!(req.subject, Subject::Individual { patient_id: p });
        assert_eq!(req.end - req.start, 30 * 60_000);

        let req = base(serde_json::json!({ "groupId": g.to_string() })).into_request().unwrap();
        assert_eq!(req.subject, Subject::Group { group_id: g });

        let both = base(serde_json::json!({ "patientId": p.to_string(), "groupId": g.to_string() }));
        assert!(matches!(both.into_request(), Err(ApiError::InvalidInput(_))));
        assert!(matches!(base(serde_json::json!({})).into_request(), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn view_survives_the_cache() {
        let appt = Appointment {
            id: Ulid::new(),
            company_id: Ulid::new(),
            clinic_id: Ulid::new(),
            subject: Subject::Group { group_id: Ulid::new() },
            employee_id: Ulid::new(),
            service_id: None,
            span: Span::new(1_767_261_600_000, 1_767_265_200_000),
            status: AppointmentStatus::NoShow,
            charged: false,
            reminded: false,
            created_by: "ana@clinic.test".into(),
            created_at: 1_767_000_000_000,
            updated_at: 1_767_000_000_000,
        };
        let view = AppointmentView::from(appt);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["appointmentType"], "group");
        assert_eq!(json["status"], "no-show");
        assert_eq!(json["start"], "2026-01-01T10:00:00Z");
        assert!(json.get("patientId").is_none());
        let back: AppointmentView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }

    #[test]
    fn unknown_status_is_invalid() {
        let q = ListQuery {
            status: Some("postponed".into()),
            ..Default::default()
        };
        assert!(matches!(q.into_filter(), Err(ApiError::InvalidInput(_))));
    }
}
