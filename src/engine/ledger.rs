//! Patient session credit.
//!
//! Credit changes never get their own WAL record when they accompany an
//! appointment change: the appointment event names the debited or refunded
//! patient, so both sides commit or neither does.

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Fails with `InsufficientCredit` when nothing is left to consume.
pub(crate) fn ensure_credit(patient: &Patient) -> Result<(), EngineError> {
    if patient.credit == 0 {
        metrics::counter!(crate::observability::INSUFFICIENT_CREDIT_TOTAL).increment(1);
        return Err(EngineError::InsufficientCredit(patient.id));
    }
    Ok(())
}

pub(crate) fn apply_debit(patient: &mut Patient) {
    patient.credit = patient.credit.saturating_sub(1);
}

pub(crate) fn apply_refund(patient: &mut Patient) {
    patient.credit = patient.credit.saturating_add(1);
}

pub(crate) fn apply_payment(patient: &mut Patient, payment: Payment) {
    patient.credit = patient.credit.saturating_add(payment.credits);
    patient.payment_history.push(payment);
}

impl Engine {
    /// Record a payment and add its credits to the patient's balance.
    pub async fn add_credit(
        &self,
        clinic_id: Ulid,
        patient_id: Ulid,
        credits: u32,
        amount_cents: i64,
        note: Option<String>,
    ) -> Result<Patient, EngineError> {
        if credits == 0 {
            return Err(EngineError::InvalidInput("credits must be positive"));
        }
        if credits > MAX_CREDITS_PER_PAYMENT {
            return Err(EngineError::LimitExceeded("too many credits in one payment"));
        }
        if amount_cents < 0 {
            return Err(EngineError::InvalidInput("amount must not be negative"));
        }
        if note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
            return Err(EngineError::LimitExceeded("note too long"));
        }

        let _gate = self.gate.read().await;
        let shared = self
            .get_patient(&patient_id)
            .ok_or(EngineError::not_found("patient", patient_id))?;
        let mut patient = shared.lock().await;
        if patient.clinic_id != clinic_id {
            return Err(EngineError::not_found("patient", patient_id));
        }

        let payment = Payment {
            credits,
            amount_cents,
            note,
            at: now_ms(),
        };
        self.wal_append(&Event::CreditAdded {
            patient_id,
            payment: payment.clone(),
        })
        .await?;
        apply_payment(&mut patient, payment);
        tracing::debug!(%patient_id, credits, balance = patient.credit, "credit added");
        Ok(patient.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(credit: u32) -> Patient {
        Patient {
            id: Ulid::new(),
            clinic_id: Ulid::new(),
            name: "Bea".into(),
            phone: None,
            credit,
            payment_history: Vec::new(),
            created_at: 0,
        }
    }

    #[test]
    fn empty_balance_is_rejected() {
        let p = patient(0);
        assert!(matches!(ensure_credit(&p), Err(EngineError::InsufficientCredit(id)) if id == p.id));
        assert!(ensure_credit(&patient(1)).is_ok());
    }

    #[test]
    fn debit_then_refund_restores_balance() {
        let mut p = patient(1);
        apply_debit(&mut p);
        assert_eq!(p.credit, 0);
        apply_refund(&mut p);
        assert_eq!(p.credit, 1);
    }

    #[test]
    fn payment_is_logged() {
        let mut p = patient(2);
        apply_payment(
            &mut p,
            Payment {
                credits: 10,
                amount_cents: 45_000,
                note: None,
                at: 7,
            },
        );
        assert_eq!(p.credit, 12);
        assert_eq!(p.payment_history.len(), 1);
        assert_eq!(p.payment_history[0].amount_cents, 45_000);
    }
}
