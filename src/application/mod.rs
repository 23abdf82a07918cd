//! Application layer - the pipeline coordinator and its background services.
//!
//! The coordinator owns all element and schedule state. The stream consumer
//! feeds it records, and the WebSocket handler feeds it client requests.

pub mod coordinator;
pub mod reports;
pub mod stream_consumer;
pub mod upload;

pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
pub use reports::{
    ApplySummary, CodeCount, CodeMatchingEntry, CodeMatchingReport, CostMatchEntry,
    CostMatchInfo, ElementInventory, IngestOutcome, OperationResponse, PipelineStats,
    ResponseStatus,
};
pub use stream_consumer::{ConsumeError, StreamConsumer, StreamConsumerConfig, StreamStatus};
pub use upload::{ParsedSchedule, UploadError, UploadScheduleCommand};
