//! Image Processing Worker API
//!
//! This library provides the core functionality for the image-worker-api
//! system: uploads are stored on disk, transformed asynchronously by workers
//! pulling jobs from a broker, and handed back to clients that poll for
//! completion.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
