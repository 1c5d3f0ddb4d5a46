//! Workflows: stored condition/action rules run against ingested emails.

pub mod engine;
pub mod events;
pub mod model;

pub use engine::{AutomaticRun, WorkflowEngine};
pub use events::{EventPublisher, WorkflowEvent, event_queue, spawn_event_consumer};
pub use model::{
    Action, ActionOutcome, Condition, ConditionField, Operator, Trigger, Workflow,
    WorkflowExecutionResult,
};
