//! Command-line interface.
//!
//! Argument definitions, command dispatch, and the operator console used
//! by `flasher run`.

pub mod args;
pub mod commands;
pub mod console;
