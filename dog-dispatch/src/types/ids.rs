use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of one start/stop cycle of a worker pool.
///
/// Workers capture the generation they were spawned under and compare it for
/// equality against the pool's current one, so threads left over from an
/// earlier cycle notice they are stale even after a rapid stop/start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId(pub Uuid);

impl GenerationId {
    /// Generate a new unique generation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned when registering a consumer, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    /// Generate a new unique consumer ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_are_distinct() {
        let a = GenerationId::new();
        let b = GenerationId::new();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn consumer_id_displays_uuid() {
        let id = ConsumerId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
