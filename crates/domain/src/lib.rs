pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod trace;
