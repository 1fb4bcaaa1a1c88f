pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod model;
pub mod protocol;
pub mod rooms;
pub mod session;
