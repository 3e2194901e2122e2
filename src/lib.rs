//! Harvester turns online talk videos into a curated dataset of
//! speaking-face segments: caption-aligned clips where the visible speaker
//! is verified to be the one talking.

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod faces;
pub mod logging;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod transcript;
