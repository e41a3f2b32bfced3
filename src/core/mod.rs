//! Core types shared across the crate: the error type and the resolution context.

pub mod context;
pub mod error;

pub use context::ResolveContext;
pub use error::{ErrorContext, FlakeError, user_friendly_error};
