//! Shared types for the work-log chat history store.

pub mod error;
pub mod message;
pub mod time;
