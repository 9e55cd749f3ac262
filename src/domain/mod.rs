pub mod models;
pub mod ports;
pub mod settings;
pub mod trigger;
