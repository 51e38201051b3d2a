pub mod board;
pub mod client;
pub mod config;
pub mod errors;
pub mod logging;
pub mod session;
