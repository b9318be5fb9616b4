pub mod access_log;
pub mod body_limit;
pub mod pipeline;
pub mod postprocess;
pub mod request_execution_context;
pub mod schema_awareness;
pub mod source;

pub use pipeline::{PipelineOutcome, ProtectionPipeline};
pub use schema_awareness::{SchemaAwareness, SchemaProviderError};
