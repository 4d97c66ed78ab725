use anyhow::{anyhow, Result};

use crate::detect::engine::InferenceEngine;

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubEngine;

#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;

/// Engine names accepted by `engine_by_name`.
pub fn available_engines() -> Vec<&'static str> {
    let mut names = vec!["stub"];
    if cfg!(feature = "backend-tract") {
        names.push("tract");
    }
    names
}

/// Construct an engine by name. `width`/`height` are the model input size.
pub fn engine_by_name(name: &str, width: u32, height: u32) -> Result<Box<dyn InferenceEngine>> {
    match name {
        "stub" => {
            let _ = (width, height);
            Ok(Box::new(StubEngine::new()))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => Ok(Box::new(TractEngine::new(width, height))),
        other => Err(anyhow!(
            "unknown engine '{}' (available: {})",
            other,
            available_engines().join(", ")
        )),
    }
}
