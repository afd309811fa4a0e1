//! Workflow vocabulary and step execution.
//!
//! The workflow is a small forward-only state graph. [`state::WorkflowState`]
//! names the points in that graph, [`outcome::StepOutcome`] is what one unit
//! of work reports back, and [`executor::StepExecutor`] is the seam between
//! the orchestration loop and the portal-specific step bodies.

pub mod executor;
pub mod outcome;
pub mod state;

pub use executor::{RenewalStepExecutor, StepExecutor};
pub use outcome::{InputPrompt, PromptKind, StepOutcome};
pub use state::WorkflowState;
