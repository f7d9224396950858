//! Bakeshop library exports for testing.
//!
//! The binary is a thin CLI over these modules; integration tests drive
//! them directly against a temporary pipeline checkout.

pub mod bake;
pub mod clean;
pub mod commands;
pub mod config;
pub mod error;
pub mod filling;
pub mod git;
pub mod markers;
pub mod package;
pub mod pipeline_config;
pub mod preflight;
pub mod prep;
pub mod process;
pub mod recipe;
pub mod timing;
