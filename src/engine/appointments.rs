use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::auth::CallerContext;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, now_ms, validate_span};
use super::ledger::ensure_credit;
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub subject: Subject,
    pub employee_id: Ulid,
    pub service_id: Option<Ulid>,
    pub start: Ms,
    pub end: Ms,
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReschedulePatch {
    pub employee_id: Option<Ulid>,
    pub service_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

impl ReschedulePatch {
    pub fn is_empty(&self) -> bool {
        self.employee_id.is_none() && self.service_id.is_none() && self.start.is_none() && self.end.is_none()
    }
}

type ScheduleGuard = OwnedRwLockWriteGuard<EmployeeState>;

impl Engine {
    /// Book a new appointment.
    ///
    /// References are validated first, then the employee's schedule is
    /// write-locked for the overlap check, the credit check, the WAL append
    /// and the apply. A concurrent booking for the same employee waits on
    /// that lock and sees this one.
    pub async fn book(
        &self,
        ctx: &CallerContext,
        clinic_id: Ulid,
        req: BookingRequest,
    ) -> Result<Appointment, EngineError> {
        let span = validate_span(req.start, req.end)?;

        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        self.validate_subject(clinic_id, &req.subject).await?;
        let es = self.validate_employee(req.employee_id).await?;
        self.validate_service(clinic_id, req.service_id)?;

        let mut es = es.write_owned().await;
        if !es.active {
            return Err(EngineError::not_found("employee", req.employee_id));
        }
        if es.slots.len() >= MAX_APPOINTMENTS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many appointments for employee"));
        }
        check_no_overlap(&es, &span, None)?;

        let patient = match req.subject {
            Subject::Individual { patient_id } => Some(
                self.get_patient(&patient_id)
                    .ok_or(EngineError::not_found("patient", patient_id))?,
            ),
            Subject::Group { .. } => None,
        };
        let mut patient = match &patient {
            Some(p) => Some(p.lock().await),
            None => None,
        };
        if let Some(p) = patient.as_deref() {
            ensure_credit(p)?;
        }

        let now = now_ms();
        let appointment = Appointment {
            id: Ulid::new(),
            company_id: self.company_id,
            clinic_id,
            subject: req.subject,
            employee_id: req.employee_id,
            service_id: req.service_id,
            span,
            status: AppointmentStatus::Scheduled,
            charged: patient.is_some(),
            reminded: false,
            created_by: ctx.email().to_string(),
            created_at: now,
            updated_at: now,
        };
        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
            debit: appointment.patient_id(),
        };
        self.wal_append(&event).await?;
        self.apply_booked(&mut es, patient.as_deref_mut(), appointment.clone());
        drop(patient);
        drop(es);

        let kind = match appointment.appointment_type() {
            AppointmentType::Individual => "individual",
            AppointmentType::Group => "group",
        };
        metrics::counter!(crate::observability::APPOINTMENTS_BOOKED_TOTAL, "type" => kind).increment(1);
        tracing::info!(
            appointment_id = %appointment.id,
            employee_id = %appointment.employee_id,
            actor = ctx.email(),
            "appointment booked"
        );
        self.notify
            .appointment_changed(self.company_id, clinic_id, appointment.id)
            .await;
        Ok(appointment)
    }

    /// Move an appointment in time, to another employee, or to another service.
    /// The overlap check excludes the appointment itself.
    pub async fn reschedule(
        &self,
        ctx: &CallerContext,
        clinic_id: Ulid,
        id: Ulid,
        patch: ReschedulePatch,
    ) -> Result<Appointment, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::InvalidInput("nothing to update"));
        }
        if let (Some(start), Some(end)) = (patch.start, patch.end) {
            validate_span(start, end)?;
        }

        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        let current = self.appointment_in_clinic(clinic_id, id)?;
        if current.status != AppointmentStatus::Scheduled {
            return Err(EngineError::InvalidInput("only scheduled appointments can be rescheduled"));
        }
        if let Some(employee_id) = patch.employee_id {
            self.validate_employee(employee_id).await?;
        }
        self.validate_service(clinic_id, patch.service_id)?;

        loop {
            let current = self.appointment_in_clinic(clinic_id, id)?;
            let from_id = current.employee_id;
            let target_id = patch.employee_id.unwrap_or(from_id);

            let (mut from, mut to) = self.lock_schedules(from_id, target_id).await?;
            let latest = self.appointment_in_clinic(clinic_id, id)?;
            if latest.employee_id != from_id {
                // moved by a concurrent reschedule; lock the new owner instead
                continue;
            }
            if latest.status != AppointmentStatus::Scheduled {
                return Err(EngineError::InvalidInput("only scheduled appointments can be rescheduled"));
            }

            let span = validate_span(
                patch.start.unwrap_or(latest.span.start),
                patch.end.unwrap_or(latest.span.end),
            )?;
            let target: &EmployeeState = match to.as_deref() {
                Some(to) => to,
                None => &*from,
            };
            if !target.active {
                return Err(EngineError::not_found("employee", target_id));
            }
            if target.id() != from_id && target.slots.len() >= MAX_APPOINTMENTS_PER_EMPLOYEE {
                return Err(EngineError::LimitExceeded("too many appointments for employee"));
            }
            check_no_overlap(target, &span, Some(id))?;

            let service_id = patch.service_id.or(latest.service_id);
            let at = now_ms();
            let event = Event::AppointmentRescheduled {
                id,
                employee_id: target_id,
                service_id,
                span,
                at,
            };
            self.wal_append(&event).await?;
            self.apply_rescheduled(&mut from, to.as_deref_mut(), id, service_id, span, at);
            drop(to);
            drop(from);

            tracing::info!(appointment_id = %id, employee_id = %target_id, actor = ctx.email(), "appointment rescheduled");
            self.notify.appointment_changed(self.company_id, clinic_id, id).await;
            return self.appointment_in_clinic(clinic_id, id);
        }
    }

    /// Write-lock one schedule, or two in ascending id order. The second
    /// guard is `Some` only when the ids differ.
    async fn lock_schedules(
        &self,
        from_id: Ulid,
        to_id: Ulid,
    ) -> Result<(ScheduleGuard, Option<ScheduleGuard>), EngineError> {
        let from = self
            .get_employee(&from_id)
            .ok_or(EngineError::not_found("employee", from_id))?;
        if from_id == to_id {
            return Ok((from.write_owned().await, None));
        }
        let to = self
            .get_employee(&to_id)
            .ok_or(EngineError::not_found("employee", to_id))?;
        if from_id < to_id {
            let from = from.write_owned().await;
            let to = to.write_owned().await;
            Ok((from, Some(to)))
        } else {
            let to = to.write_owned().await;
            let from = from.write_owned().await;
            Ok((from, Some(to)))
        }
    }

    /// Move a scheduled appointment to a final status. `done` goes through
    /// [`Engine::complete`]; `cancelled` frees the slot and refunds the credit.
    pub async fn set_status(
        &self,
        ctx: &CallerContext,
        clinic_id: Ulid,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        match status {
            AppointmentStatus::Scheduled => {
                return Err(EngineError::InvalidInput("appointments cannot return to scheduled"));
            }
            AppointmentStatus::Done => return self.complete(ctx, clinic_id, id).await,
            AppointmentStatus::Cancelled | AppointmentStatus::NoShow => {}
        }

        let _gate = self.gate.read().await;
        let (appt, mut es) = self.lock_appointment(clinic_id, id).await?;
        if appt.status != AppointmentStatus::Scheduled {
            return Err(EngineError::InvalidInput("appointment is not scheduled"));
        }

        let refund_to = match (status, appt.charged, appt.patient_id()) {
            (AppointmentStatus::Cancelled, true, Some(pid)) => Some(pid),
            _ => None,
        };
        let patient = refund_to.and_then(|pid| self.get_patient(&pid));
        if refund_to.is_some() && patient.is_none() {
            tracing::warn!(appointment_id = %id, "patient missing, credit refund skipped");
        }
        let mut patient = match &patient {
            Some(p) => Some(p.lock().await),
            None => None,
        };
        let refund = patient.as_ref().map(|p| p.id);

        let at = now_ms();
        let event = Event::AppointmentStatusChanged {
            id,
            status,
            debit: None,
            refund,
            at,
        };
        self.wal_append(&event).await?;
        self.apply_status(&mut es, patient.as_deref_mut(), id, status, false, refund.is_some(), at);
        drop(patient);
        drop(es);

        tracing::info!(appointment_id = %id, status = status.as_str(), actor = ctx.email(), "appointment status changed");
        self.notify.appointment_changed(self.company_id, clinic_id, id).await;
        self.appointment_in_clinic(clinic_id, id)
    }

    /// Mark a scheduled appointment done. A booking already holding a credit
    /// consumes it; an uncharged individual appointment is debited here.
    pub async fn complete(
        &self,
        ctx: &CallerContext,
        clinic_id: Ulid,
        id: Ulid,
    ) -> Result<Appointment, EngineError> {
        let _gate = self.gate.read().await;
        let (appt, mut es) = self.lock_appointment(clinic_id, id).await?;
        if appt.status != AppointmentStatus::Scheduled {
            return Err(EngineError::InvalidInput("only scheduled appointments can be completed"));
        }

        let debit = if appt.charged { None } else { appt.patient_id() };
        let patient = match debit {
            Some(pid) => Some(
                self.get_patient(&pid)
                    .ok_or(EngineError::not_found("patient", pid))?,
            ),
            None => None,
        };
        let mut patient = match &patient {
            Some(p) => Some(p.lock().await),
            None => None,
        };
        if let Some(p) = patient.as_deref() {
            ensure_credit(p)?;
        }

        let at = now_ms();
        let event = Event::AppointmentStatusChanged {
            id,
            status: AppointmentStatus::Done,
            debit,
            refund: None,
            at,
        };
        self.wal_append(&event).await?;
        self.apply_status(
            &mut es,
            patient.as_deref_mut(),
            id,
            AppointmentStatus::Done,
            debit.is_some(),
            false,
            at,
        );
        drop(patient);
        drop(es);

        tracing::info!(appointment_id = %id, actor = ctx.email(), "appointment completed");
        self.notify.appointment_changed(self.company_id, clinic_id, id).await;
        self.appointment_in_clinic(clinic_id, id)
    }

    /// Hard delete. A held credit goes back to the patient; a missing
    /// patient skips the refund without failing the delete.
    pub async fn delete_appointment(
        &self,
        ctx: &CallerContext,
        clinic_id: Ulid,
        id: Ulid,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let (appt, mut es) = self.lock_appointment(clinic_id, id).await?;

        let refund_to = if appt.charged { appt.patient_id() } else { None };
        let patient = refund_to.and_then(|pid| self.get_patient(&pid));
        if refund_to.is_some() && patient.is_none() {
            tracing::warn!(appointment_id = %id, "patient missing, credit refund skipped");
        }
        let mut patient = match &patient {
            Some(p) => Some(p.lock().await),
            None => None,
        };
        let refund = patient.as_ref().map(|p| p.id);

        self.wal_append(&Event::AppointmentDeleted { id, refund }).await?;
        self.apply_deleted(&mut es, patient.as_deref_mut(), id);
        drop(patient);
        drop(es);

        tracing::info!(appointment_id = %id, refunded = refund.is_some(), actor = ctx.email(), "appointment deleted");
        self.notify.appointment_changed(self.company_id, clinic_id, id).await;
        Ok(())
    }

    /// Queue a reminder for a scheduled appointment that has none yet.
    /// `Ok(None)` when there is nothing to do.
    pub async fn queue_reminder(&self, id: Ulid) -> Result<Option<Notification>, EngineError> {
        let _gate = self.gate.read().await;
        let Some(clinic_id) = self.appointments.get(&id).map(|a| a.clinic_id) else {
            return Ok(None);
        };
        let (appt, es) = self.lock_appointment(clinic_id, id).await?;
        if appt.status != AppointmentStatus::Scheduled || appt.reminded {
            return Ok(None);
        }

        let starts_at = chrono::DateTime::from_timestamp_millis(appt.span.start)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| appt.span.start.to_string());
        let notification = Notification {
            id: Ulid::new(),
            clinic_id,
            appointment_id: id,
            recipient: appt.subject,
            message: format!("Reminder: you have an appointment at {starts_at}"),
            created_at: now_ms(),
        };
        self.wal_append(&Event::ReminderQueued {
            notification: notification.clone(),
        })
        .await?;
        self.apply_reminder(notification.clone());
        drop(es);

        metrics::counter!(crate::observability::REMINDERS_QUEUED_TOTAL).increment(1);
        self.notify.appointment_changed(self.company_id, clinic_id, id).await;
        Ok(Some(notification))
    }
}
