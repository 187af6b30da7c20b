pub mod config;
pub mod message;
pub mod reducer;
pub mod session;
