pub mod config;
pub mod controllers;
pub mod errors;
pub mod exporters;
pub mod models;
pub mod services;

pub use controllers::SessionController;
