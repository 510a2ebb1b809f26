//! # CLI
//!
//! The interactive harness behind the `cowdb` binary: a rustyline REPL that
//! drives one fixed-layout tree for manual exercise of the cursor API. Not
//! part of the storage contract, just a convenience for poking at
//! repositories.

mod repl;

pub use repl::Repl;
