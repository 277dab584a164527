mod appointments;
mod availability;
mod conflict;
mod directory;
mod error;
mod ledger;
mod queries;
mod references;

pub use appointments::{BookingRequest, ReschedulePatch};
pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use conflict::now_ms;
pub use error::EngineError;
pub use queries::AppointmentFilter;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::InvalidationNotifier;
use crate::wal::Wal;

pub type SharedEmployee = Arc<RwLock<EmployeeState>>;
pub type SharedPatient = Arc<Mutex<Patient>>;
pub type SharedGroup = Arc<Mutex<Group>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends that arrive while a flush is
/// pending are drained into one batch and committed with a single fsync.
/// A non-append command ends the batch and runs after it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch: Vec<PendingAppend> = match cmd {
            WalCommand::Append { event, response } => vec![(event, response)],
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so a half-buffered batch never
    // leaks into the next one; every sender of this batch is told it failed.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// All state of one company, rebuilt from its WAL.
///
/// Lock order for mutations: `gate` (shared) → `directory` → employee
/// schedules in ascending id order → patient / group.
pub struct Engine {
    company_id: Ulid,
    company: OnceLock<Company>,
    clinics: DashMap<Ulid, Clinic>,
    employees: DashMap<Ulid, SharedEmployee>,
    /// Active staff by normalized email, readable without schedule locks.
    staff: DashMap<String, (Ulid, EmployeeRole)>,
    patients: DashMap<Ulid, SharedPatient>,
    groups: DashMap<Ulid, SharedGroup>,
    services: DashMap<Ulid, Service>,
    appointments: DashMap<Ulid, Appointment>,
    notifications: DashMap<Ulid, Notification>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<InvalidationNotifier>,
    /// Held shared by every mutation, exclusively by compaction.
    gate: RwLock<()>,
    /// Serializes directory inserts whose uniqueness checks span the company.
    directory: Mutex<()>,
}

impl Engine {
    pub fn new(company_id: Ulid, wal_path: PathBuf, notify: Arc<InvalidationNotifier>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            company_id,
            company: OnceLock::new(),
            clinics: DashMap::new(),
            employees: DashMap::new(),
            staff: DashMap::new(),
            patients: DashMap::new(),
            groups: DashMap::new(),
            services: DashMap::new(),
            appointments: DashMap::new(),
            notifications: DashMap::new(),
            wal_tx,
            notify,
            gate: RwLock::new(()),
            directory: Mutex::new(()),
        };

        for event in events {
            engine.replay_event(event);
        }
        Ok(engine)
    }

    pub fn company_id(&self) -> Ulid {
        self.company_id
    }

    /// `None` until the company has been created.
    pub fn company(&self) -> Option<Company> {
        self.company.get().cloned()
    }

    /// Replay runs before the engine is shared, so every lock is uncontended.
    /// Never block here: replay may run inside an async context.
    fn replay_event(&self, event: Event) {
        match event {
            Event::CompanyCreated { company, owner } => {
                let _ = self.company.set(company);
                self.insert_employee(owner);
            }
            Event::ClinicCreated { clinic } => {
                self.clinics.insert(clinic.id, clinic);
            }
            Event::EmployeeAdded { employee } => self.insert_employee(employee),
            Event::EmployeeRemoved { id } => {
                if let Some(es) = self.get_employee(&id) {
                    let mut es = es.try_write().expect("replay: uncontended write");
                    es.active = false;
                    self.staff.remove_if(&es.employee.email, |_, (sid, _)| *sid == id);
                }
            }
            Event::PatientCreated { patient } => {
                self.patients.insert(patient.id, Arc::new(Mutex::new(patient)));
            }
            Event::CreditAdded { patient_id, payment } => {
                if let Some(p) = self.get_patient(&patient_id) {
                    ledger::apply_payment(&mut p.try_lock().expect("replay: uncontended lock"), payment);
                }
            }
            Event::GroupCreated { group } => {
                self.groups.insert(group.id, Arc::new(Mutex::new(group)));
            }
            Event::GroupMemberAdded { group_id, patient_id } => {
                if let Some(g) = self.get_group(&group_id) {
                    g.try_lock().expect("replay: uncontended lock").member_ids.push(patient_id);
                }
            }
            Event::ServiceCreated { service } => {
                self.services.insert(service.id, service);
            }
            Event::ServiceRemoved { id } => {
                self.services.remove(&id);
            }
            Event::AppointmentBooked { appointment, debit } => {
                let Some(es) = self.get_employee(&appointment.employee_id) else { return };
                let mut es = es.try_write().expect("replay: uncontended write");
                let patient = debit.and_then(|pid| self.get_patient(&pid));
                let mut patient = patient.as_ref().map(|p| p.try_lock().expect("replay: uncontended lock"));
                self.apply_booked(&mut es, patient.as_deref_mut(), appointment);
            }
            Event::AppointmentRescheduled { id, employee_id, service_id, span, at } => {
                let Some(current) = self.appointments.get(&id).map(|a| a.employee_id) else { return };
                let (Some(from), Some(to)) = (self.get_employee(&current), self.get_employee(&employee_id)) else {
                    return;
                };
                let mut from = from.try_write().expect("replay: uncontended write");
                if current == employee_id {
                    self.apply_rescheduled(&mut from, None, id, service_id, span, at);
                } else {
                    let mut to = to.try_write().expect("replay: uncontended write");
                    self.apply_rescheduled(&mut from, Some(&mut to), id, service_id, span, at);
                }
            }
            Event::AppointmentStatusChanged { id, status, debit, refund, at } => {
                let Some(employee_id) = self.appointments.get(&id).map(|a| a.employee_id) else { return };
                let Some(es) = self.get_employee(&employee_id) else { return };
                let mut es = es.try_write().expect("replay: uncontended write");
                let patient = debit.or(refund).and_then(|pid| self.get_patient(&pid));
                let mut patient = patient.as_ref().map(|p| p.try_lock().expect("replay: uncontended lock"));
                self.apply_status(&mut es, patient.as_deref_mut(), id, status, debit.is_some(), refund.is_some(), at);
            }
            Event::AppointmentDeleted { id, refund } => {
                let Some(employee_id) = self.appointments.get(&id).map(|a| a.employee_id) else { return };
                let Some(es) = self.get_employee(&employee_id) else { return };
                let mut es = es.try_write().expect("replay: uncontended write");
                let patient = refund.and_then(|pid| self.get_patient(&pid));
                let mut patient = patient.as_ref().map(|p| p.try_lock().expect("replay: uncontended lock"));
                self.apply_deleted(&mut es, patient.as_deref_mut(), id);
            }
            Event::ReminderQueued { notification } => self.apply_reminder(notification),
        }
    }

    // ── Appliers shared by replay and the live paths ─────────
    //
    // Callers hold the write lock of every schedule and patient passed in.

    fn insert_employee(&self, employee: Employee) {
        self.staff
            .insert(employee.email.clone(), (employee.id, employee.role));
        self.employees
            .insert(employee.id, Arc::new(RwLock::new(EmployeeState::new(employee))));
    }

    pub(super) fn apply_booked(
        &self,
        es: &mut EmployeeState,
        patient: Option<&mut Patient>,
        appointment: Appointment,
    ) {
        if appointment.holds_slot() {
            es.insert_slot(Slot {
                appointment_id: appointment.id,
                span: appointment.span,
            });
        }
        if let Some(p) = patient {
            ledger::apply_debit(p);
        }
        self.appointments.insert(appointment.id, appointment);
    }

    pub(super) fn apply_rescheduled(
        &self,
        from: &mut EmployeeState,
        to: Option<&mut EmployeeState>,
        id: Ulid,
        service_id: Option<Ulid>,
        span: Span,
        at: Ms,
    ) {
        let Some(mut appt) = self.appointments.get_mut(&id) else { return };
        let had_slot = from.remove_slot(id).is_some();
        let target = match to {
            Some(to) => to,
            None => from,
        };
        if had_slot {
            target.insert_slot(Slot { appointment_id: id, span });
        }
        if appt.span.start != span.start {
            appt.reminded = false;
        }
        appt.employee_id = target.id();
        appt.service_id = service_id;
        appt.span = span;
        appt.updated_at = at;
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn apply_status(
        &self,
        es: &mut EmployeeState,
        patient: Option<&mut Patient>,
        id: Ulid,
        status: AppointmentStatus,
        debit: bool,
        refund: bool,
        at: Ms,
    ) {
        let Some(mut appt) = self.appointments.get_mut(&id) else { return };
        appt.status = status;
        appt.updated_at = at;
        if !appt.holds_slot() {
            es.remove_slot(id);
        }
        if debit {
            appt.charged = true;
        }
        if refund {
            appt.charged = false;
        }
        if let Some(p) = patient {
            if debit {
                ledger::apply_debit(p);
            } else if refund {
                ledger::apply_refund(p);
            }
        }
    }

    pub(super) fn apply_deleted(&self, es: &mut EmployeeState, patient: Option<&mut Patient>, id: Ulid) {
        es.remove_slot(id);
        self.appointments.remove(&id);
        if let Some(p) = patient {
            ledger::apply_refund(p);
        }
    }

    pub(super) fn apply_reminder(&self, notification: Notification) {
        if let Some(mut appt) = self.appointments.get_mut(&notification.appointment_id) {
            appt.reminded = true;
        }
        self.notifications.insert(notification.id, notification);
    }

    // ── Lookup helpers ───────────────────────────────────────

    pub(super) fn get_employee(&self, id: &Ulid) -> Option<SharedEmployee> {
        self.employees.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_patient(&self, id: &Ulid) -> Option<SharedPatient> {
        self.patients.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_group(&self, id: &Ulid) -> Option<SharedGroup> {
        self.groups.get(id).map(|e| e.value().clone())
    }

    /// Write event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Lock the schedule currently owning an appointment. Retries when a
    /// concurrent reschedule moves the appointment to another employee
    /// between lookup and lock.
    pub(super) async fn lock_appointment(
        &self,
        clinic_id: Ulid,
        id: Ulid,
    ) -> Result<(Appointment, OwnedRwLockWriteGuard<EmployeeState>), EngineError> {
        loop {
            let appt = self.appointment_in_clinic(clinic_id, id)?;
            let es = self
                .get_employee(&appt.employee_id)
                .ok_or(EngineError::not_found("employee", appt.employee_id))?;
            let guard = es.write_owned().await;
            match self.appointments.get(&id).map(|a| a.value().clone()) {
                Some(current) if current.employee_id == guard.id() => return Ok((current, guard)),
                Some(_) => continue,
                None => return Err(EngineError::not_found("appointment", id)),
            }
        }
    }

    pub(super) fn appointment_in_clinic(&self, clinic_id: Ulid, id: Ulid) -> Result<Appointment, EngineError> {
        match self.appointments.get(&id) {
            Some(a) if a.clinic_id == clinic_id => Ok(a.value().clone()),
            _ => Err(EngineError::not_found("appointment", id)),
        }
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _quiesced = self.gate.write().await;
        let Some(company) = self.company() else {
            return Ok(());
        };

        let mut employees = Vec::new();
        for entry in self.employees.iter() {
            let es = entry.value().clone();
            employees.push(es);
        }
        let mut snapshot = Vec::with_capacity(employees.len());
        for es in employees {
            let guard = es.read().await;
            snapshot.push((guard.employee.clone(), guard.active));
        }
        snapshot.sort_by_key(|(e, _)| e.id);

        let mut events = Vec::new();
        let owner = snapshot
            .iter()
            .find(|(e, _)| e.role == EmployeeRole::Owner)
            .map(|(e, _)| e.clone())
            .ok_or(EngineError::WalError("company has no owner".into()))?;
        events.push(Event::CompanyCreated { company, owner });

        for c in self.clinics.iter() {
            events.push(Event::ClinicCreated { clinic: c.value().clone() });
        }
        for (employee, _) in snapshot.iter().filter(|(e, _)| e.role != EmployeeRole::Owner) {
            events.push(Event::EmployeeAdded { employee: employee.clone() });
        }
        for s in self.services.iter() {
            events.push(Event::ServiceCreated { service: s.value().clone() });
        }
        let patients: Vec<SharedPatient> = self.patients.iter().map(|e| e.value().clone()).collect();
        for p in patients {
            events.push(Event::PatientCreated { patient: p.lock().await.clone() });
        }
        let groups: Vec<SharedGroup> = self.groups.iter().map(|e| e.value().clone()).collect();
        for g in groups {
            events.push(Event::GroupCreated { group: g.lock().await.clone() });
        }

        // Reminders go first: replayed before their appointment they only
        // restore the notification, and the snapshot keeps `reminded` as is.
        let mut notifications: Vec<Notification> =
            self.notifications.iter().map(|n| n.value().clone()).collect();
        notifications.sort_by_key(|n| n.id);
        events.extend(
            notifications
                .into_iter()
                .map(|notification| Event::ReminderQueued { notification }),
        );
        let mut appointments: Vec<Appointment> =
            self.appointments.iter().map(|a| a.value().clone()).collect();
        appointments.sort_by_key(|a| a.id);
        // credit already reflected in the patient snapshot
        events.extend(
            appointments
                .into_iter()
                .map(|appointment| Event::AppointmentBooked { appointment, debit: None }),
        );
        for (employee, active) in &snapshot {
            if !active {
                events.push(Event::EmployeeRemoved { id: employee.id });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
