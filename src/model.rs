use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type inside the engine.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` for empty or inverted intervals.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Directory entities ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: Ulid,
    pub name: String,
    pub owner_email: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clinic {
    pub id: Ulid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmployeeRole {
    Owner,
    Staff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Ulid,
    pub email: String,
    pub name: String,
    pub role: EmployeeRole,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub credits: u32,
    pub amount_cents: i64,
    pub note: Option<String>,
    pub at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub name: String,
    pub phone: Option<String>,
    /// Session credits; one is consumed per individual booking.
    pub credit: u32,
    pub payment_history: Vec<Payment>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub name: String,
    pub member_ids: Vec<Ulid>,
    pub max_size: u32,
    pub created_at: Ms,
}

impl Group {
    pub fn is_full(&self) -> bool {
        self.member_ids.len() >= self.max_size as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub price_cents: i64,
}

// ── Appointments ─────────────────────────────────────────────────

/// Who the appointment is for. Exactly one subject per appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subject {
    Individual { patient_id: Ulid },
    Group { group_id: Ulid },
}

impl Subject {
    pub fn id(&self) -> Ulid {
        match self {
            Subject::Individual { patient_id } => *patient_id,
            Subject::Group { group_id } => *group_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentType {
    Individual,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Done,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Done => "done",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "done" => Some(AppointmentStatus::Done),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "no-show" => Some(AppointmentStatus::NoShow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub company_id: Ulid,
    pub clinic_id: Ulid,
    pub subject: Subject,
    pub employee_id: Ulid,
    pub service_id: Option<Ulid>,
    pub span: Span,
    pub status: AppointmentStatus,
    /// One credit unit of the patient is currently held by this appointment.
    pub charged: bool,
    pub reminded: bool,
    pub created_by: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Appointment {
    pub fn appointment_type(&self) -> AppointmentType {
        match self.subject {
            Subject::Individual { .. } => AppointmentType::Individual,
            Subject::Group { .. } => AppointmentType::Group,
        }
    }

    pub fn patient_id(&self) -> Option<Ulid> {
        match self.subject {
            Subject::Individual { patient_id } => Some(patient_id),
            Subject::Group { .. } => None,
        }
    }

    /// Cancelled appointments release their slot.
    pub fn holds_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }
}

/// An occupied interval on an employee's schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub appointment_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EmployeeState {
    pub employee: Employee,
    /// False once removed from the company; the schedule stays so that
    /// cancelled appointments still resolve.
    pub active: bool,
    /// Slots of non-cancelled appointments, sorted by `span.start`.
    pub slots: Vec<Slot>,
}

impl EmployeeState {
    pub fn new(employee: Employee) -> Self {
        Self {
            employee,
            active: true,
            slots: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.employee.id
    }

    /// Insert slot maintaining sort order by span.start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.span.start, |s| s.span.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, appointment_id: Ulid) -> Option<Slot> {
        let pos = self
            .slots
            .iter()
            .position(|s| s.appointment_id == appointment_id)?;
        Some(self.slots.remove(pos))
    }

    /// Slots whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self.slots.partition_point(|s| s.span.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.span.end > query.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub clinic_id: Ulid,
    pub appointment_id: Ulid,
    pub recipient: Subject,
    pub message: String,
    pub created_at: Ms,
}

/// WAL record format. Each variant is one atomic state change of a company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CompanyCreated {
        company: Company,
        owner: Employee,
    },
    ClinicCreated {
        clinic: Clinic,
    },
    EmployeeAdded {
        employee: Employee,
    },
    EmployeeRemoved {
        id: Ulid,
    },
    PatientCreated {
        patient: Patient,
    },
    CreditAdded {
        patient_id: Ulid,
        payment: Payment,
    },
    GroupCreated {
        group: Group,
    },
    GroupMemberAdded {
        group_id: Ulid,
        patient_id: Ulid,
    },
    ServiceCreated {
        service: Service,
    },
    ServiceRemoved {
        id: Ulid,
    },
    /// `debit` names the patient whose credit is consumed by this booking.
    AppointmentBooked {
        appointment: Appointment,
        debit: Option<Ulid>,
    },
    AppointmentRescheduled {
        id: Ulid,
        employee_id: Ulid,
        service_id: Option<Ulid>,
        span: Span,
        at: Ms,
    },
    AppointmentStatusChanged {
        id: Ulid,
        status: AppointmentStatus,
        debit: Option<Ulid>,
        refund: Option<Ulid>,
        at: Ms,
    },
    AppointmentDeleted {
        id: Ulid,
        refund: Option<Ulid>,
    },
    ReminderQueued {
        notification: Notification,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(name: &str) -> Employee {
        Employee {
            id: Ulid::new(),
            email: format!("{name}@clinic.test"),
            name: name.into(),
            role: EmployeeRole::Staff,
            created_at: 0,
        }
    }

    fn slot(start: Ms, end: Ms) -> Slot {
        Slot {
            appointment_id: Ulid::new(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span::new(100, 101)));
    }

    #[test]
    fn slots_stay_sorted() {
        let mut es = EmployeeState::new(staff("ana"));
        es.insert_slot(slot(300, 400));
        es.insert_slot(slot(100, 200));
        es.insert_slot(slot(200, 300));
        let starts: Vec<Ms> = es.slots.iter().map(|s| s.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut es = EmployeeState::new(staff("ana"));
        let slots: Vec<Slot> = (0..3).map(|i| slot(i * 100, i * 100 + 50)).collect();
        for s in &slots {
            es.insert_slot(*s);
        }
        assert_eq!(es.remove_slot(slots[1].appointment_id), Some(slots[1]));
        assert_eq!(es.slots, vec![slots[0], slots[2]]);
        assert!(es.remove_slot(Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut es = EmployeeState::new(staff("ana"));
        es.insert_slot(slot(100, 200));
        es.insert_slot(slot(450, 600));
        es.insert_slot(slot(1000, 1100));

        let hits: Vec<_> = es.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut es = EmployeeState::new(staff("ana"));
        es.insert_slot(slot(100, 200));
        assert_eq!(es.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(es.overlapping(&Span::new(0, 100)).count(), 0);
        // one millisecond of overlap is enough
        assert_eq!(es.overlapping(&Span::new(199, 300)).count(), 1);
    }

    #[test]
    fn overlapping_long_slot_spanning_query() {
        let mut es = EmployeeState::new(staff("ana"));
        es.insert_slot(slot(0, 10_000));
        assert_eq!(es.overlapping(&Span::new(500, 600)).count(), 1);
    }

    #[test]
    fn appointment_type_follows_subject() {
        let mut appt = Appointment {
            id: Ulid::new(),
            company_id: Ulid::new(),
            clinic_id: Ulid::new(),
            subject: Subject::Individual { patient_id: Ulid::new() },
            employee_id: Ulid::new(),
            service_id: None,
            span: Span::new(0, 10),
            status: AppointmentStatus::Scheduled,
            charged: true,
            reminded: false,
            created_by: "owner@clinic.test".into(),
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(appt.appointment_type(), AppointmentType::Individual);
        assert!(appt.patient_id().is_some());

        appt.subject = Subject::Group { group_id: Ulid::new() };
        assert_eq!(appt.appointment_type(), AppointmentType::Group);
        assert!(appt.patient_id().is_none());

        assert!(appt.holds_slot());
        appt.status = AppointmentStatus::NoShow;
        assert!(appt.holds_slot());
        appt.status = AppointmentStatus::Cancelled;
        assert!(!appt.holds_slot());
    }

    #[test]
    fn status_strings() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Done,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AppointmentStatus::parse("noshow"), None);
    }

    #[test]
    fn booked_event_survives_bincode() {
        let event = Event::AppointmentBooked {
            appointment: Appointment {
                id: Ulid::new(),
                company_id: Ulid::new(),
                clinic_id: Ulid::new(),
                subject: Subject::Group { group_id: Ulid::new() },
                employee_id: Ulid::new(),
                service_id: Some(Ulid::new()),
                span: Span::new(1_000, 2_000),
                status: AppointmentStatus::Scheduled,
                charged: false,
                reminded: false,
                created_by: "owner@clinic.test".into(),
                created_at: 5,
                updated_at: 5,
            },
            debit: None,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
