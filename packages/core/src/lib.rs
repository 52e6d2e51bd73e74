// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod crawler;
pub mod credentials;
pub mod db;
pub mod error;
pub mod metrics;
pub mod notifier;
pub mod repository;
pub mod services;
pub mod sync;

// These modules are only needed by the binary.
// Declared pub so integration tests can reach them if needed.
pub mod cli;
pub mod config;
pub mod logging;
