//! An embeddable interactive command shell.
//!
//! Applications register commands, implemented in Rust, with a [`Shell`] and
//! hand it input lines. A line is split into tokens, parsed into pipeline
//! ranges joined by `&&` / `||`, and executed in-process: stages of a range
//! talk through two in-memory buffers instead of OS pipes, so a command reads
//! and writes through its [`session::Session`] the same way whether it runs
//! alone or in the middle of a pipeline.
//!
//! The public modules [`command`] and [`session`] expose what is needed to
//! write your own commands; [`builtin`] holds the commands every shell starts
//! with.

pub mod builtin;
pub mod command;
pub mod completion;
pub mod config;
pub mod io_adapters;
mod interpreter;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod readline;
pub mod session;

/// The shell itself and its line-level types.
///
/// See [`Shell`] for the high-level API and examples.
pub use interpreter::{LineError, LineSource, Shell, combine};
