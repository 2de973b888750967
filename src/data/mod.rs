//! Data loading and storage
//!
//! JSON training-data sources and the SQLite registry store.

pub mod database;
pub mod dataset;

pub use database::SqliteStore;
pub use dataset::{JsonDataSource, TrainingData, TrainingDataSource};
