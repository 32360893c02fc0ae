//! Submission pipeline: preprocess, name, resolve namespace, build, submit,
//! then fetch logs and clean up.

pub mod interpreter;
pub mod manager;
pub mod namespace;
pub mod naming;

pub use interpreter::MagicInterpreter;
pub use manager::{Manager, Submission};
