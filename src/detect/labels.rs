use anyhow::{anyhow, Result};
use std::collections::HashSet;

use crate::detect::result::Detection;

/// Parse a labelmap: one label per line, index = line number.
///
/// Blank lines are kept so indices stay aligned with the model's classes.
pub fn parse_labelmap(bytes: &[u8]) -> Result<Vec<String>> {
    let text =
        std::str::from_utf8(bytes).map_err(|e| anyhow!("labelmap is not valid UTF-8: {}", e))?;
    let labels: Vec<String> = text
        .lines()
        .map(|line| line.trim_end_matches(['\r', '\0']).to_string())
        .collect();
    if labels.iter().all(|label| label.trim().is_empty()) {
        return Err(anyhow!("labelmap contains no labels"));
    }
    Ok(labels)
}

/// Score threshold plus the set of labels the caller cares about.
///
/// An empty label set accepts every label.
#[derive(Clone, Debug)]
pub struct LabelFilter {
    threshold: f32,
    desired: HashSet<String>,
}

impl LabelFilter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            desired: HashSet::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn add_label(&mut self, label: impl Into<String>) -> bool {
        self.desired.insert(label.into())
    }

    pub fn remove_label(&mut self, label: &str) -> bool {
        self.desired.remove(label)
    }

    /// Desired labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.desired.iter().cloned().collect();
        labels.sort();
        labels
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.score >= self.threshold
            && (self.desired.is_empty() || self.desired.contains(&detection.label))
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}

impl Default for LabelFilter {
    fn default() -> Self {
        Self::new(0.5)
    }
}
