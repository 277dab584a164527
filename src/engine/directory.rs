//! Companies, clinics, staff, patients, groups and services.
//!
//! Owner-only restrictions are enforced by the caller; this layer checks
//! existence, uniqueness, clinic scoping and limits.

use std::sync::Arc;

use tokio::sync::Mutex;
use ulid::Ulid;

use crate::auth::normalize_email;
use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError};

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<String, EngineError> {
    let email = normalize_email(email);
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(EngineError::InvalidInput("invalid email")),
    }
}

fn check_optional(value: &Option<String>) -> Result<(), EngineError> {
    if value.as_ref().is_some_and(|v| v.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("field too long"));
    }
    Ok(())
}

impl Engine {
    // ── Company ─────────────────────────────────────────────

    /// Create the company behind this engine together with its owner.
    pub async fn init_company(
        &self,
        name: String,
        owner_email: &str,
        owner_name: String,
    ) -> Result<Company, EngineError> {
        check_name(&name)?;
        check_name(&owner_name)?;
        let owner_email = check_email(owner_email)?;

        let _gate = self.gate.read().await;
        let _dir = self.directory.lock().await;
        if self.company.get().is_some() {
            return Err(EngineError::AlreadyExists("company"));
        }

        let now = now_ms();
        let company = Company {
            id: self.company_id,
            name,
            owner_email: owner_email.clone(),
            created_at: now,
        };
        let owner = Employee {
            id: Ulid::new(),
            email: owner_email,
            name: owner_name,
            role: EmployeeRole::Owner,
            created_at: now,
        };
        self.wal_append(&Event::CompanyCreated {
            company: company.clone(),
            owner: owner.clone(),
        })
        .await?;
        let _ = self.company.set(company.clone());
        self.insert_employee(owner);
        tracing::info!(company_id = %self.company_id, "company created");
        Ok(company)
    }

    /// Active employee id and role for an email, if any.
    pub fn staff_member(&self, email: &str) -> Option<(Ulid, EmployeeRole)> {
        self.staff.get(&normalize_email(email)).map(|e| *e.value())
    }

    // ── Clinics ─────────────────────────────────────────────

    pub async fn create_clinic(&self, name: String, address: Option<String>) -> Result<Clinic, EngineError> {
        check_name(&name)?;
        check_optional(&address)?;

        let _gate = self.gate.read().await;
        let _dir = self.directory.lock().await;
        if self.clinics.len() >= MAX_CLINICS_PER_COMPANY {
            return Err(EngineError::LimitExceeded("too many clinics"));
        }
        let clinic = Clinic {
            id: Ulid::new(),
            name,
            address,
            created_at: now_ms(),
        };
        self.wal_append(&Event::ClinicCreated { clinic: clinic.clone() }).await?;
        self.clinics.insert(clinic.id, clinic.clone());
        Ok(clinic)
    }

    pub fn clinic(&self, id: Ulid) -> Option<Clinic> {
        self.clinics.get(&id).map(|c| c.value().clone())
    }

    pub fn list_clinics(&self) -> Vec<Clinic> {
        let mut out: Vec<Clinic> = self.clinics.iter().map(|c| c.value().clone()).collect();
        out.sort_by_key(|c| c.id);
        out
    }

    // ── Employees ───────────────────────────────────────────

    pub async fn add_employee(&self, email: &str, name: String) -> Result<Employee, EngineError> {
        check_name(&name)?;
        let email = check_email(email)?;

        let _gate = self.gate.read().await;
        let _dir = self.directory.lock().await;
        if self.staff.contains_key(&email) {
            return Err(EngineError::AlreadyExists("employee"));
        }
        if self.employees.len() >= MAX_EMPLOYEES_PER_COMPANY {
            return Err(EngineError::LimitExceeded("too many employees"));
        }
        let employee = Employee {
            id: Ulid::new(),
            email,
            name,
            role: EmployeeRole::Staff,
            created_at: now_ms(),
        };
        self.wal_append(&Event::EmployeeAdded {
            employee: employee.clone(),
        })
        .await?;
        self.insert_employee(employee.clone());
        tracing::info!(employee_id = %employee.id, "employee added");
        Ok(employee)
    }

    /// The owner and anyone with a non-cancelled appointment stay.
    pub async fn remove_employee(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        let _dir = self.directory.lock().await;
        let es = self
            .get_employee(&id)
            .ok_or(EngineError::not_found("employee", id))?;
        let mut es = es.write().await;
        if !es.active {
            return Err(EngineError::not_found("employee", id));
        }
        if es.employee.role == EmployeeRole::Owner {
            return Err(EngineError::InvalidInput("the owner cannot be removed"));
        }
        if !es.slots.is_empty() {
            return Err(EngineError::InvalidInput("employee still has appointments"));
        }

        self.wal_append(&Event::EmployeeRemoved { id }).await?;
        es.active = false;
        self.staff.remove_if(&es.employee.email, |_, (sid, _)| *sid == id);
        tracing::info!(employee_id = %id, "employee removed");
        Ok(())
    }

    pub async fn employee(&self, id: Ulid) -> Result<Employee, EngineError> {
        let es = self
            .get_employee(&id)
            .ok_or(EngineError::not_found("employee", id))?;
        let es = es.read().await;
        if !es.active {
            return Err(EngineError::not_found("employee", id));
        }
        Ok(es.employee.clone())
    }

    pub async fn list_employees(&self) -> Vec<Employee> {
        let shared: Vec<_> = self.employees.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for es in shared {
            let es = es.read().await;
            if es.active {
                out.push(es.employee.clone());
            }
        }
        out.sort_by_key(|e| e.id);
        out
    }

    // ── Patients ────────────────────────────────────────────

    pub async fn create_patient(
        &self,
        clinic_id: Ulid,
        name: String,
        phone: Option<String>,
        credit: u32,
    ) -> Result<Patient, EngineError> {
        check_name(&name)?;
        check_optional(&phone)?;
        if credit > MAX_CREDITS_PER_PAYMENT {
            return Err(EngineError::LimitExceeded("initial credit too large"));
        }

        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        let patient = Patient {
            id: Ulid::new(),
            clinic_id,
            name,
            phone,
            credit,
            payment_history: Vec::new(),
            created_at: now_ms(),
        };
        self.wal_append(&Event::PatientCreated {
            patient: patient.clone(),
        })
        .await?;
        self.patients
            .insert(patient.id, Arc::new(Mutex::new(patient.clone())));
        Ok(patient)
    }

    pub async fn patient(&self, clinic_id: Ulid, id: Ulid) -> Result<Patient, EngineError> {
        self.require_clinic(clinic_id)?;
        let p = self
            .get_patient(&id)
            .ok_or(EngineError::not_found("patient", id))?;
        let p = p.lock().await;
        if p.clinic_id != clinic_id {
            return Err(EngineError::not_found("patient", id));
        }
        Ok(p.clone())
    }

    pub async fn list_patients(&self, clinic_id: Ulid) -> Result<Vec<Patient>, EngineError> {
        self.require_clinic(clinic_id)?;
        let shared: Vec<_> = self.patients.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for p in shared {
            let p = p.lock().await;
            if p.clinic_id == clinic_id {
                out.push(p.clone());
            }
        }
        out.sort_by_key(|p| p.id);
        Ok(out)
    }

    // ── Groups ──────────────────────────────────────────────

    pub async fn create_group(&self, clinic_id: Ulid, name: String, max_size: u32) -> Result<Group, EngineError> {
        check_name(&name)?;
        if max_size == 0 {
            return Err(EngineError::InvalidInput("max size must be positive"));
        }
        if max_size > MAX_GROUP_SIZE {
            return Err(EngineError::LimitExceeded("group too large"));
        }

        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        let group = Group {
            id: Ulid::new(),
            clinic_id,
            name,
            member_ids: Vec::new(),
            max_size,
            created_at: now_ms(),
        };
        self.wal_append(&Event::GroupCreated { group: group.clone() }).await?;
        self.groups.insert(group.id, Arc::new(Mutex::new(group.clone())));
        Ok(group)
    }

    /// Members must be patients of the group's clinic, each at most once.
    pub async fn add_group_member(
        &self,
        clinic_id: Ulid,
        group_id: Ulid,
        patient_id: Ulid,
    ) -> Result<Group, EngineError> {
        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        self.validate_subject(clinic_id, &Subject::Individual { patient_id })
            .await?;

        let shared = self
            .get_group(&group_id)
            .ok_or(EngineError::not_found("group", group_id))?;
        let mut group = shared.lock().await;
        if group.clinic_id != clinic_id {
            return Err(EngineError::not_found("group", group_id));
        }
        if group.member_ids.contains(&patient_id) {
            return Err(EngineError::AlreadyExists("group member"));
        }
        if group.is_full() {
            return Err(EngineError::LimitExceeded("group is full"));
        }

        self.wal_append(&Event::GroupMemberAdded { group_id, patient_id })
            .await?;
        group.member_ids.push(patient_id);
        Ok(group.clone())
    }

    pub async fn group(&self, clinic_id: Ulid, id: Ulid) -> Result<Group, EngineError> {
        self.require_clinic(clinic_id)?;
        let g = self
            .get_group(&id)
            .ok_or(EngineError::not_found("group", id))?;
        let g = g.lock().await;
        if g.clinic_id != clinic_id {
            return Err(EngineError::not_found("group", id));
        }
        Ok(g.clone())
    }

    pub async fn list_groups(&self, clinic_id: Ulid) -> Result<Vec<Group>, EngineError> {
        self.require_clinic(clinic_id)?;
        let shared: Vec<_> = self.groups.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for g in shared {
            let g = g.lock().await;
            if g.clinic_id == clinic_id {
                out.push(g.clone());
            }
        }
        out.sort_by_key(|g| g.id);
        Ok(out)
    }

    // ── Services ────────────────────────────────────────────

    pub async fn create_service(
        &self,
        clinic_id: Ulid,
        name: String,
        duration_minutes: u32,
        price_cents: i64,
    ) -> Result<Service, EngineError> {
        check_name(&name)?;
        if duration_minutes == 0 {
            return Err(EngineError::InvalidInput("duration must be positive"));
        }
        if i64::from(duration_minutes) * 60_000 > MAX_APPOINTMENT_DURATION_MS {
            return Err(EngineError::LimitExceeded("service too long"));
        }
        if price_cents < 0 {
            return Err(EngineError::InvalidInput("price must not be negative"));
        }

        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        let service = Service {
            id: Ulid::new(),
            clinic_id,
            name,
            duration_minutes,
            price_cents,
        };
        self.wal_append(&Event::ServiceCreated {
            service: service.clone(),
        })
        .await?;
        self.services.insert(service.id, service.clone());
        Ok(service)
    }

    /// Existing appointments keep their service reference.
    pub async fn remove_service(&self, clinic_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.gate.read().await;
        self.require_clinic(clinic_id)?;
        match self.services.get(&id) {
            Some(s) if s.clinic_id == clinic_id => {}
            _ => return Err(EngineError::not_found("service", id)),
        }
        self.wal_append(&Event::ServiceRemoved { id }).await?;
        self.services.remove(&id);
        Ok(())
    }

    pub fn list_services(&self, clinic_id: Ulid) -> Result<Vec<Service>, EngineError> {
        self.require_clinic(clinic_id)?;
        let mut out: Vec<Service> = self
            .services
            .iter()
            .filter(|s| s.clinic_id == clinic_id)
            .map(|s| s.value().clone())
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized_and_checked() {
        assert_eq!(check_email(" Ana@Clinic.Test ").unwrap(), "ana@clinic.test");
        assert!(matches!(check_email("no-at-sign"), Err(EngineError::InvalidInput(_))));
        assert!(matches!(check_email("@clinic.test"), Err(EngineError::InvalidInput(_))));
        let long = format!("{}@x.test", "a".repeat(MAX_EMAIL_LEN));
        assert!(matches!(check_email(&long), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(matches!(check_name("   "), Err(EngineError::InvalidInput(_))));
        assert!(matches!(check_name(&"x".repeat(MAX_NAME_LEN + 1)), Err(EngineError::LimitExceeded(_))));
        assert!(check_name("Downtown").is_ok());
    }
}
