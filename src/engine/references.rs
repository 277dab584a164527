use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedEmployee};

impl Engine {
    pub(super) fn require_clinic(&self, clinic_id: Ulid) -> Result<(), EngineError> {
        if self.clinics.contains_key(&clinic_id) {
            Ok(())
        } else {
            Err(EngineError::not_found("clinic", clinic_id))
        }
    }

    /// The patient or group must exist in this company and belong to `clinic_id`.
    pub(super) async fn validate_subject(&self, clinic_id: Ulid, subject: &Subject) -> Result<(), EngineError> {
        match *subject {
            Subject::Individual { patient_id } => {
                let p = self
                    .get_patient(&patient_id)
                    .ok_or(EngineError::not_found("patient", patient_id))?;
                if p.lock().await.clinic_id != clinic_id {
                    return Err(EngineError::mismatch("patient", patient_id));
                }
            }
            Subject::Group { group_id } => {
                let g = self
                    .get_group(&group_id)
                    .ok_or(EngineError::not_found("group", group_id))?;
                if g.lock().await.clinic_id != clinic_id {
                    return Err(EngineError::mismatch("group", group_id));
                }
            }
        }
        Ok(())
    }

    /// The employee must be a current member of the company.
    pub(super) async fn validate_employee(&self, employee_id: Ulid) -> Result<SharedEmployee, EngineError> {
        let es = self
            .get_employee(&employee_id)
            .ok_or(EngineError::not_found("employee", employee_id))?;
        if !es.read().await.active {
            return Err(EngineError::not_found("employee", employee_id));
        }
        Ok(es)
    }

    pub(super) fn validate_service(&self, clinic_id: Ulid, service_id: Option<Ulid>) -> Result<(), EngineError> {
        let Some(id) = service_id else { return Ok(()) };
        let service = self
            .services
            .get(&id)
            .ok_or(EngineError::not_found("service", id))?;
        if service.clinic_id != clinic_id {
            return Err(EngineError::mismatch("service", id));
        }
        Ok(())
    }
}
