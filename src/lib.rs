pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod library;
pub mod model;
pub mod service;
