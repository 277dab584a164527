use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Build a bookable span. Runs before any datastore access.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end)
        .ok_or(EngineError::InvalidInput("end must be after start"))?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_APPOINTMENT_DURATION_MS {
        return Err(EngineError::LimitExceeded("appointment too long"));
    }
    Ok(span)
}

/// Reject `span` if it intersects any slot on the schedule other than
/// `exclude`. Adjacent slots do not intersect.
pub(crate) fn check_no_overlap(
    es: &EmployeeState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match es
        .overlapping(span)
        .find(|slot| Some(slot.appointment_id) != exclude)
    {
        Some(slot) => {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(slot.appointment_id))
        }
        None => Ok(()),
    }
}
