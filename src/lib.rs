pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

pub use models::*;
pub use services::*;
