use ulid::Ulid;

/// Closed error taxonomy for the reservation engine. Every variant carries a
/// human-readable message; the wire layer maps each to a SQLSTATE.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed or out-of-policy input. No side effects occurred.
    Validation(String),
    /// Referenced room or booking does not exist.
    NotFound(Ulid),
    /// Room name already taken (case-insensitive).
    DuplicateName(String),
    /// Overlapping confirmed booking; carries the blocking booking's id.
    Conflict(Ulid),
    /// An idempotent creation with this key is still pending — retry later.
    InProgress,
    /// Policy violation on an otherwise well-formed request.
    BusinessRule(&'static str),
    LimitExceeded(&'static str),
    /// Persistence failure; any partial state was rolled back.
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::DuplicateName(name) => {
                write!(f, "room name already taken: {name}")
            }
            EngineError::Conflict(id) => write!(f, "overlapping booking: {id}"),
            EngineError::InProgress => write!(f, "request already in progress"),
            EngineError::BusinessRule(msg) => write!(f, "business rule: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
