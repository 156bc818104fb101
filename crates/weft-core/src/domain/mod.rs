//! Domain model (ids, task contract, states).

pub mod ids;
pub mod state;
pub mod task;

pub use ids::TaskId;
pub use state::TaskState;
pub use task::{KeyedTask, ResourceKey, ResourceTask};
