//! A line-oriented TCP service that runs each line it receives as a shell
//! command and answers with the command's status and output.

pub mod common;
pub mod config;
pub mod error;
pub mod exports;
pub mod net;
