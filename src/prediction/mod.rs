//! Client-Side Prediction
//!
//! The local player moves as soon as input is sampled; the server's verdict
//! arrives later and is folded in by [`ClientPredictor::reconcile`].

pub mod buffer;
pub mod predictor;
pub mod smoothing;

pub use buffer::PredictionBuffer;
pub use predictor::{ClientPredictor, PredictionConfig, PredictionStats};
pub use smoothing::RenderOffset;
