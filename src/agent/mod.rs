pub mod admin;
pub mod command;
pub mod job;
pub mod notify;
