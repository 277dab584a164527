use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// `entity` is a lowercase noun such as "patient" or "appointment".
    NotFound { entity: &'static str, id: Ulid },
    AlreadyExists(&'static str),
    /// The entity exists in the company but not under the clinic named by the request.
    ReferenceMismatch { entity: &'static str, id: Ulid },
    InvalidInput(&'static str),
    InsufficientCredit(Ulid),
    /// Overlaps the named appointment on the same employee's schedule.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: Ulid) -> Self {
        EngineError::NotFound { entity, id }
    }

    pub(crate) fn mismatch(entity: &'static str, id: Ulid) -> Self {
        EngineError::ReferenceMismatch { entity, id }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::ReferenceMismatch { entity, id } => {
                write!(f, "{entity} {id} does not belong to this clinic")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InsufficientCredit(patient) => {
                write!(f, "patient {patient} has no remaining credit")
            }
            EngineError::Conflict(id) => write!(f, "slot already taken by appointment {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
