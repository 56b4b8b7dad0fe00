//! Run one build script across a fleet of remote machines and collect the
//! `exports/` directory each of them produces.

pub mod config;
pub mod error;
pub mod remote;
pub mod report;
