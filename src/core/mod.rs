pub mod bundle;
pub mod dataset;
pub mod eda;
pub mod engine;
pub mod metrics;
pub mod models;
pub mod predictor;
pub mod preprocessing;
pub mod tracking;

pub use crate::domain::model::{Dataset, PatientRecord, Prediction};
pub use crate::domain::ports::{Classifier, Pipeline, Storage};
pub use crate::utils::error::Result;
