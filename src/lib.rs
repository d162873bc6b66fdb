pub mod api;
pub mod checkout;
pub mod config;
pub mod db;
pub mod entities;
pub mod middleware;
