pub mod admin;
pub mod handlers;
pub mod session;
