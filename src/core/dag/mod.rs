//! Job graph lifecycle against the OGE backend: submission, batch task
//! registration, status reconciliation and the workflow that chains them.

pub mod batch;
pub mod prune;
pub mod status;
pub mod submission;
pub mod types;
pub mod workflow;

pub use batch::{BatchTaskService, TaskSubmission};
pub use status::{ReconciledStatus, StatusService};
pub use submission::{JobSubmissionService, Submission};
pub use types::{RunState, TaskRecord, TerminalOutcome};
pub use workflow::{WorkflowOrchestrator, WorkflowReport, WorkflowRequest, WorkflowStatus};
