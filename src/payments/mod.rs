pub mod credential;
pub mod error;
pub mod phone;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;
