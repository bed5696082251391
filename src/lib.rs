//! rep-tracker library crate.
//!
//! Frame buffering and repetition counting on top of an external form
//! classifier. Exposed as a library so integration tests in tests/ can import
//! the modules via `rep_tracker::`; src/main.rs wires them to stdin/stdout.
pub mod buffer;
pub mod classifier;
pub mod config;
pub mod error;
pub mod exercise;
pub mod input;
pub mod preprocess;
pub mod protocol;
pub mod reps;
pub mod session;
pub mod utils;
