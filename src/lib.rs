//! WorkDay: API REST del marketplace di lavori tra clienti e lavoratori.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

pub use routes::{create_router, AppState};
