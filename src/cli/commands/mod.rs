pub mod audit;
pub mod auth;
pub mod request;
pub mod session;
pub mod state;
