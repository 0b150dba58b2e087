//! Builds one interleaved document out of Bible translation resources:
//! locate, fetch, parse, assemble, link and render, one job per request.

pub mod assembly;
pub mod books;
pub mod catalog;
pub mod config;
pub mod document;
pub mod error;
pub mod jobs;
pub mod links;
pub mod lookup;
pub mod model;
pub mod parser;
pub mod provision;
pub mod render;

pub use jobs::JobController;
