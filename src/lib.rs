pub mod assemble;
pub mod config;
pub mod domain;
pub mod error;
pub mod importer;
pub mod parser;
pub mod persist;
pub mod reconcile;
pub mod workspace;
