//! QuickNotes library
//!
//! Note lifecycle and Azure DevOps reconciliation engine. The binary is a
//! thin host; everything is exposed here for tests and embedding.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod remote;
pub mod services;
