//! Dispatch core for the level-one completion endpoint.
//!
//! A request's `response_format` token is resolved into an [`OutputShape`],
//! the blocking model routine runs on a deadline-bound worker thread, and the
//! result is base64-wrapped for transport.

pub mod codec;
pub mod dispatch;
pub mod invoke;
pub mod llm;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod shape;

pub use tokio_util::sync::CancellationToken;

pub use dispatch::{DispatchError, DispatchResponse, RequestDispatcher, ResponseBody};
pub use invoke::{CompletionRequest, InvocationCall, Invoker};
pub use registry::SchemaRegistry;
pub use resolver::{ShapePolicy, ShapeResolver};
pub use runtime::{DeadlineExecutor, InvocationOutcome};
pub use shape::{OutputShape, PrimitiveKind};
