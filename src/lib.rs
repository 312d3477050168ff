#![forbid(unsafe_code)]

pub mod archive;
pub mod cli;
pub mod config;
pub mod course;
pub mod download;
pub mod extract;
pub mod fetch;
pub mod harvest;
pub mod logging;
pub mod platform;
pub mod reconcile;
pub mod sanitize;
pub mod session;
pub mod url_norm;
