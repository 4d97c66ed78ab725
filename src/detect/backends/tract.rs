#![cfg(feature = "backend-tract")]

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::engine::InferenceEngine;
use crate::detect::result::Detection;

/// Tract-based engine for SSD-style ONNX detectors.
///
/// Expects four outputs: boxes `[1, N, 4]` (top, left, bottom, right),
/// classes `[1, N]`, scores `[1, N]` and a detection count `[1]`.
pub struct TractEngine {
    model: Option<TypedRunnableModel<TypedModel>>,
    labels: Vec<String>,
    width: u32,
    height: u32,
}

impl TractEngine {
    /// Engine whose model takes `width`x`height` RGB input.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            model: None,
            labels: Vec::new(),
            width,
            height,
        }
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized;
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(image, self.width, self.height, FilterType::Triangle);
            &resized
        };
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn label_for(&self, class: f32) -> String {
        // Class ids are offset by one against the labelmap, which starts with
        // a background entry.
        let index = class.round().max(0.0) as usize + 1;
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class{}", index))
    }
}

fn output_values(outputs: &TVec<TValue>, index: usize) -> Result<Vec<f32>> {
    let output = outputs
        .get(index)
        .ok_or_else(|| anyhow!("model produced {} outputs, expected 4", outputs.len()))?;
    let view = output
        .to_array_view::<f32>()
        .with_context(|| format!("output {} was not f32", index))?;
    Ok(view.iter().copied().collect())
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&mut self, model: &[u8], labels: &[String]) -> Result<()> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(model))
            .context("failed to parse ONNX model")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.model = Some(plan);
        self.labels = labels.to_vec();
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn invoke(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract engine used before load"))?;
        let input = self.build_input(image);
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;

        let boxes = output_values(&outputs, 0)?;
        let classes = output_values(&outputs, 1)?;
        let scores = output_values(&outputs, 2)?;
        let count = output_values(&outputs, 3)?
            .first()
            .copied()
            .unwrap_or(0.0)
            .max(0.0) as usize;
        let count = count
            .min(classes.len())
            .min(scores.len())
            .min(boxes.len() / 4);

        Ok((0..count)
            .map(|i| {
                Detection::new(
                    self.label_for(classes[i]),
                    scores[i],
                    [boxes[4 * i], boxes[4 * i + 1], boxes[4 * i + 2], boxes[4 * i + 3]],
                )
            })
            .collect())
    }
}
