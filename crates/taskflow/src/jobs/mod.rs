pub mod batch;
pub mod decomposer;
pub mod engine;
pub mod error_codes;
pub mod kind;
pub mod memory;
pub mod model;
pub mod registry;
pub mod repo;
pub mod store;

pub use batch::{BatchItem, BatchResults, BatchSummary, BatchSynthesizer, BatchTracker, ResultOrError};
pub use decomposer::{DecomposeError, DecomposeOutcome, DecomposeRequest, Decomposer};
pub use engine::{EngineConfig, EngineHandle, EngineReport, WorkerEngine};
pub use error_codes::{ErrorCode, JobError};
pub use kind::{JobKind, JobSpec};
pub use memory::MemoryJobStore;
pub use model::{Job, JobOutcome, JobStatus, NewJob};
pub use registry::{HandlerOptions, HandlerRegistry};
pub use repo::JobsRepo;
pub use store::JobStore;
