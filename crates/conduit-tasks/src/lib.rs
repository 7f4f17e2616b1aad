//! Conduit Tasks - memoized task dispatch
//!
//! This crate derives stable cache keys for task invocations, guarantees at
//! most one execution per key, and runs shell-style tasks over a
//! [`conduit_channels::Channel`].

pub mod dispatcher;
pub mod error;
pub mod file;
pub mod key;
pub mod memo;
pub mod registry;
pub mod reporter;
pub mod staging;
pub mod task;
pub mod value;

pub use dispatcher::{DispatchOptions, Dispatcher};
pub use error::{FailureKind, HashError, StagingError, TaskFailure};
pub use file::File;
pub use key::CacheKey;
pub use memo::{Claim, MemoCache, Outcome, OwnerTicket, Slot};
pub use registry::{Canonicalizer, HashRegistry};
pub use reporter::{
    CollectingReporter, TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter,
};
pub use staging::stage_in;
pub use task::{Invocation, TaskId, TaskRecord, TaskState};
pub use value::{ArgObject, TypeTag, Value};
