// PayFlow client core - library root

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod demo;
pub mod error;
pub mod http_client;
pub mod models;
pub mod transport;
pub mod validation;
