//! Tool-calling machinery.
//!
//! Normalizes the heterogeneous tool-call wire shapes into one
//! [`ToolCall`] type, resolves tools through a [`ToolRegistry`], and
//! executes batches via [`ToolExecutor`], streaming progress events as
//! each call runs. [`StreamJsonDetector`] finds prompt-embedded JSON
//! tool calls in free-flowing model text.

pub mod calls;
pub mod client;
pub mod detector;
pub mod executor;
pub mod registry;

pub use calls::{CallerMode, RawToolCall, ToolCall, ToolCallFormat};
pub use client::{ContentItem, RemoteToolClient, ToolCallOutcome};
pub use detector::StreamJsonDetector;
pub use executor::{ToolEvent, ToolExecutor, ToolStatus};
pub use registry::{RemoteTool, ToolRegistry};
