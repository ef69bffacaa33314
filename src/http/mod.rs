pub mod error;
pub mod server;
