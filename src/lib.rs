pub mod app;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod remote;
pub mod source;
pub mod sra;
pub mod store;
pub mod taxonomy;
pub mod walker;
