pub mod artifacts;
pub mod booster;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod horizon_predictor;
pub mod horizon_trainer;
pub mod lightgbm_cli;
pub mod models;
pub mod panel;
pub mod pipeline;
pub mod raw_data;
pub mod service;

#[cfg(test)]
mod test_support;

pub use error::{ForecastError, Result};
