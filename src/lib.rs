//! Local mirror of the Bestdori song, chart and post catalog, kept fresh by
//! periodic incremental synchronization.

pub mod app;
pub mod assets;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod sync;

pub use app::App;
pub use config::Config;
pub use error::{AppError, Result};
