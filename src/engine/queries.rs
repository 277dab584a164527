use std::fmt::Write as _;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_spans;
use super::{Engine, EngineError};

/// Narrowing for appointment listings. Every field is optional; `from`/`to`
/// keep appointments overlapping `[from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub employee_id: Option<Ulid>,
    pub patient_id: Option<Ulid>,
    pub group_id: Option<Ulid>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<Ms>,
    pub to: Option<Ms>,
}

impl AppointmentFilter {
    pub fn matches(&self, a: &Appointment) -> bool {
        if self.employee_id.is_some_and(|id| id != a.employee_id) {
            return false;
        }
        if self.patient_id.is_some() && self.patient_id != a.patient_id() {
            return false;
        }
        if let Some(gid) = self.group_id
            && a.subject != (Subject::Group { group_id: gid })
        {
            return false;
        }
        if self.status.is_some_and(|s| s != a.status) {
            return false;
        }
        if self.from.is_some_and(|from| a.span.end <= from) {
            return false;
        }
        if self.to.is_some_and(|to| a.span.start >= to) {
            return false;
        }
        true
    }

    /// Stable cache-key component. Equal filters give equal signatures.
    pub fn signature(&self) -> String {
        let mut sig = String::new();
        if let Some(id) = self.employee_id {
            let _ = write!(sig, "e={id};");
        }
        if let Some(id) = self.patient_id {
            let _ = write!(sig, "p={id};");
        }
        if let Some(id) = self.group_id {
            let _ = write!(sig, "g={id};");
        }
        if let Some(s) = self.status {
            let _ = write!(sig, "s={};", s.as_str());
        }
        if let Some(from) = self.from {
            let _ = write!(sig, "f={from};");
        }
        if let Some(to) = self.to {
            let _ = write!(sig, "t={to};");
        }
        if sig.is_empty() {
            sig.push_str("all");
        }
        sig
    }
}

impl Engine {
    pub fn get_appointment(&self, clinic_id: Ulid, id: Ulid) -> Result<Appointment, EngineError> {
        self.require_clinic(clinic_id)?;
        self.appointment_in_clinic(clinic_id, id)
    }

    /// Appointments of one clinic, ordered by start then id.
    pub fn list_appointments(
        &self,
        clinic_id: Ulid,
        filter: &AppointmentFilter,
    ) -> Result<Vec<Appointment>, EngineError> {
        self.require_clinic(clinic_id)?;
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && to <= from
        {
            return Err(EngineError::InvalidInput("to must be after from"));
        }

        let mut out: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| a.clinic_id == clinic_id && filter.matches(a))
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.span.start, a.id));
        Ok(out)
    }

    /// Free gaps on an employee's schedule inside `[from, to)`.
    pub async fn free_time(
        &self,
        employee_id: Ulid,
        from: Ms,
        to: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let window = Span::try_new(from, to).ok_or(EngineError::InvalidInput("to must be after from"))?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let es = self
            .get_employee(&employee_id)
            .ok_or(EngineError::not_found("employee", employee_id))?;
        let guard = es.read().await;
        if !guard.active {
            return Err(EngineError::not_found("employee", employee_id));
        }
        let busy: Vec<Span> = guard.overlapping(&window).map(|s| s.span).collect();
        drop(guard);

        Ok(free_spans(&busy, &window, min_duration.unwrap_or(0)))
    }

    /// Scheduled appointments without a reminder that start in `[now, now + lead)`.
    pub fn collect_due_reminders(&self, now: Ms, lead: Ms) -> Vec<Ulid> {
        let horizon = now.saturating_add(lead);
        let mut due: Vec<(Ms, Ulid)> = self
            .appointments
            .iter()
            .filter(|a| {
                a.status == AppointmentStatus::Scheduled
                    && !a.reminded
                    && a.span.start >= now
                    && a.span.start < horizon
            })
            .map(|a| (a.span.start, a.id))
            .collect();
        due.sort_unstable();
        due.into_iter().map(|(_, id)| id).collect()
    }

    /// Newest first.
    pub fn list_notifications(&self, clinic_id: Ulid) -> Result<Vec<Notification>, EngineError> {
        self.require_clinic(clinic_id)?;
        let mut out: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.clinic_id == clinic_id)
            .map(|n| n.value().clone())
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }
}
