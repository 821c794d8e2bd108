use std::fmt::{Debug, Display, Formatter};

/// Server-issued correlation token identifying one dispatched task. Opaque to the worker; echoed
/// back verbatim on every respond and heartbeat request.
#[derive(Clone, Default, Hash, PartialEq, Eq, derive_more::From)]
pub struct TaskToken(pub Vec<u8>);

impl TaskToken {
    /// Rendering used anywhere a token reaches logs or error messages; tokens are arbitrary
    /// bytes, not text.
    pub fn to_base64(&self) -> String {
        base64::encode(&self.0)
    }
}

impl Display for TaskToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl Debug for TaskToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskToken({})", self.to_base64())
    }
}
