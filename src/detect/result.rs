/// One accepted object detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Confidence in [0, 1].
    pub score: f32,
    /// Normalized box: top, left, bottom, right.
    pub rect: [f32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32, rect: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            score,
            rect,
        }
    }

    pub fn top(&self) -> f32 {
        self.rect[0]
    }

    pub fn left(&self) -> f32 {
        self.rect[1]
    }

    pub fn bottom(&self) -> f32 {
        self.rect[2]
    }

    pub fn right(&self) -> f32 {
        self.rect[3]
    }
}

/// Outcome of one detector pass. `None` means inference was skipped or
/// nothing passed the filter.
pub type DetectionResult = Option<Vec<Detection>>;
