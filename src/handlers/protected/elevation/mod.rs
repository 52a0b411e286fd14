pub mod audit;
pub mod requests;
pub mod sessions;
pub mod state;
