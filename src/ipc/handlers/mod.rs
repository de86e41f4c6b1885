pub mod attendance;
pub mod auth;
pub mod core;
pub mod reports;
pub mod roster;
pub mod sessions;
pub mod students;
