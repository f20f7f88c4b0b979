pub mod config;
pub mod gateway;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod state;
