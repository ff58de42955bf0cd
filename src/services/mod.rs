pub mod facade;
pub mod platform;
pub mod sql;

pub use facade::Services;
pub use platform::{DatabaseInstance, PlatformClient};
