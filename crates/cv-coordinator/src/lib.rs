//! Convene coordinator
//!
//! Fans each host invitation out to every guest, collects the guests'
//! responses and sends one summary back to the host when everybody has
//! answered.
//!
//! - [`Dispatcher`]: invitation topic to addressed copies
//! - [`Aggregator`]: response topic to summary
//! - [`ConsumptionLoop`]: poll, handle, acknowledge
//! - [`Coordinator`]: runs both loops over one [`WorkflowStore`]
//!
//! Delivery is at-least-once. Both handlers are idempotent per invitation id
//! and per response id.

pub mod aggregator;
pub mod consumer;
pub mod coordinator;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod store;

pub use aggregator::{Aggregator, ResponseOutcome};
pub use consumer::{ConsumptionLoop, LoopSettings, RecordHandler};
pub use coordinator::{Coordinator, CoordinatorSettings};
pub use directory::{DirectoryError, RecipientDirectory, StaticDirectory};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{CoordinatorError, Result};
pub use store::{WorkflowState, WorkflowStore, Workflows};
