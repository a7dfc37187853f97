pub mod admin;
pub mod api;
pub mod config;
pub mod countdown;
pub mod db;
pub mod error;
pub mod feed;
pub mod types;
