pub mod aggregate;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod formatter;
pub mod html;
pub mod models;
pub mod notify;
pub mod report;
pub mod retry;
pub mod token_store;
pub mod window;
