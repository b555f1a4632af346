pub mod system;
pub mod users;
