//! Object detection behind a motion gate.
//!
//! - `InferenceEngine`: the seam to the model runtime (`StubEngine`, and
//!   `TractEngine` with the `backend-tract` feature)
//! - `LabelFilter`: score threshold plus desired labels
//! - `MotionGatedDetector`: skips inference on frames without visible change

pub mod backends;
mod engine;
pub mod labels;
mod motion;
pub mod preprocess;
mod result;

pub use backends::{available_engines, engine_by_name, StubEngine};
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use engine::{AssetSource, InferenceEngine};
pub use labels::{parse_labelmap, LabelFilter};
pub use motion::{MotionConfig, MotionGatedDetector};
pub use result::{Detection, DetectionResult};
