//! A tube-based priority work queue speaking the beanstalkd text protocol.
//!
//! The [`engine`] owns every job and tube and runs on a single task; the
//! [`server`] feeds it commands parsed from client connections.
pub mod config;
pub mod engine;
pub mod error;
pub mod line_reader;
pub mod parser;
pub mod server;
pub mod types;
pub mod util;
