//! Model inference with Candle.
//!
//! Holds the at-most-once model loader, the query runner that turns scores
//! into answers, and the ViLT implementation behind the model ports.

mod device;
mod loader;
mod runner;
pub mod vilt;

pub use device::select_device;
pub use loader::{load_safetensors, ModelBundle, ModelLoader};
pub use runner::{argmax, Prediction, QueryRunner};
