pub mod client;
pub mod config;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod state;
pub mod ui;
