pub mod analytics;
pub mod api;
pub mod config;
pub mod course;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod media;
pub mod server;
pub mod user;
pub mod utils;

#[cfg(test)]
mod test_utils;
