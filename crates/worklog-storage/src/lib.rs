//! Local chat history persistence for the work-log assistant.

pub mod accessor;
pub mod db;
pub mod migrations;
pub mod transfer;
