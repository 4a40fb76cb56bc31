pub mod agent;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod event;
pub mod model;
pub mod tray;
pub mod utils;

#[cfg(test)]
mod testing;
