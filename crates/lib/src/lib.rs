//! chatrelay core library: storage, the HTTP relay in front of the completion API, and the
//! chat client logic used by the CLI.

pub mod client;
pub mod config;
pub mod gateway;
pub mod init;
pub mod knowledge;
pub mod session;
pub mod store;
