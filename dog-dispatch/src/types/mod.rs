pub mod ids;
pub mod named;
pub mod state;

pub use ids::{ConsumerId, GenerationId};
pub use named::Named;
pub use state::QueueState;
