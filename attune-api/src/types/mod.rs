//! API Request and Response Types
//!
//! This module defines all request and response types for the ATTUNE API.

// Experiment types
mod experiment;
pub use experiment::*;

// User types
mod user;
pub use user::*;

// Auth types
mod auth;
pub use auth::*;
