//! Domain model: task document, status machine, per-photo results, change
//! events and the error taxonomy.

pub mod errors;
pub mod events;
pub mod ids;
pub mod results;
pub mod status;
pub mod task;
pub mod update;

pub use self::errors::{AgentError, ErrorKind, PipelineError, StoreError};
pub use self::events::{ChangeEvent, ChangeFilter, OperationKind};
pub use self::ids::TaskId;
pub use self::results::{
    Adjustments, CorrectionStatus, PhotoCorrectionResult, PhotoPublishResult, PhotoRef,
    PublishStatus,
};
pub use self::status::{Stage, TaskStatus};
pub use self::task::{AgentLogEntry, RetryMetadata, Task, TaskMetadata};
pub use self::update::{TaskFilter, TaskUpdate, UpdateResult};
