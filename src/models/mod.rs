pub mod query;
pub mod row;
pub mod user;

pub use query::{FetchRequest, FetchResponse, SqlParam};
pub use row::{Row, SqlValue};
pub use user::UserInfo;
