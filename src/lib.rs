pub mod config;
pub mod runtime;
pub mod session;

pub use worklog_app::logging;
pub use worklog_core::error;
pub use worklog_core::message;
pub use worklog_core::time;
pub use worklog_storage::accessor;
pub use worklog_storage::db;
pub use worklog_storage::migrations;
pub use worklog_storage::transfer;
