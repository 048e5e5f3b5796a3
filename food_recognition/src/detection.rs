use serde::Serialize;

pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    fn intersection(&self, other: &BoundingBox) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        if w <= 0. || h <= 0. {
            return 0.;
        }
        w * h
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0. {
            return 0.;
        }
        intersection / union
    }
}

/// One object proposed by the model for an image.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionCandidate {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    #[serde(rename = "food")]
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "model_type")]
    pub model_source_tag: String,
}

impl PredictionResult {
    /// Top-1 selection over `candidates`. Ties keep the earliest candidate in
    /// model output order.
    pub fn from_candidates(candidates: &[DetectionCandidate], model_source_tag: &str) -> Self {
        let top = candidates.iter().fold(None, |best: Option<&DetectionCandidate>, c| {
            match best {
                Some(b) if c.confidence <= b.confidence => Some(b),
                _ => Some(c),
            }
        });

        match top {
            Some(candidate) => Self {
                label: candidate.class_name.clone(),
                confidence: candidate.confidence,
                model_source_tag: model_source_tag.to_string(),
            },
            None => Self {
                label: UNKNOWN_LABEL.to_string(),
                confidence: 0.0,
                model_source_tag: model_source_tag.to_string(),
            },
        }
    }
}

/// Greedy non-maximum suppression. Input order is the tie-break for equal
/// confidences.
pub fn non_max_suppression(
    mut candidates: Vec<DetectionCandidate>,
    iou_threshold: f32,
) -> Vec<DetectionCandidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectionCandidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id
                && k.bounding_box.iou(&candidate.bounding_box) >= iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(class_id: u32, class_name: &str, confidence: f32, x1: f32) -> DetectionCandidate {
        DetectionCandidate {
            class_id,
            class_name: class_name.to_string(),
            confidence,
            bounding_box: BoundingBox {
                x1,
                y1: 0.,
                x2: x1 + 10.,
                y2: 10.,
            },
        }
    }

    #[test]
    fn test_top_candidate_wins() {
        let candidates = vec![
            candidate(47, "apple", 0.42, 0.),
            candidate(53, "pizza", 0.91, 50.),
        ];

        let result = PredictionResult::from_candidates(&candidates, "custom");

        assert_eq!(result.label, "pizza");
        assert_eq!(result.confidence, 0.91);
        assert_eq!(result.model_source_tag, "custom");
    }

    #[test]
    fn test_no_candidates_is_unknown() {
        let result = PredictionResult::from_candidates(&[], "pretrained-yolov8n");

        assert_eq!(result.label, UNKNOWN_LABEL);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.model_source_tag, "pretrained-yolov8n");
    }

    #[test]
    fn test_tie_keeps_first_in_output_order() {
        let candidates = vec![
            candidate(1, "banana", 0.3, 0.),
            candidate(2, "orange", 0.8, 20.),
            candidate(3, "broccoli", 0.8, 40.),
        ];

        let result = PredictionResult::from_candidates(&candidates, "custom");

        assert_eq!(result.label, "orange");
    }

    #[test]
    fn test_confidence_is_maximum_of_candidates() {
        let confidences = [0.1, 0.73, 0.05, 0.72, 0.6];
        let candidates: Vec<_> = confidences
            .iter()
            .enumerate()
            .map(|(i, c)| candidate(i as u32, &format!("class{}", i), *c, i as f32 * 20.))
            .collect();

        let result = PredictionResult::from_candidates(&candidates, "custom");

        assert_eq!(result.confidence, 0.73);
        assert_eq!(result.label, "class1");
    }

    #[test]
    fn test_serialized_field_names() {
        let result = PredictionResult {
            label: "pizza".to_string(),
            confidence: 0.5,
            model_source_tag: "custom".to_string(),
        };

        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["food"], "pizza");
        assert_eq!(value["confidence"], 0.5);
        assert_eq!(value["model_type"], "custom");
    }

    #[test]
    fn test_nms_drops_overlapping_same_class() {
        let candidates = vec![
            candidate(53, "pizza", 0.6, 1.),
            candidate(53, "pizza", 0.9, 0.),
            candidate(47, "apple", 0.5, 0.),
            candidate(53, "pizza", 0.4, 100.),
        ];

        let kept = non_max_suppression(candidates, 0.7);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_name, "apple");
        assert_eq!(kept[2].confidence, 0.4);
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        let a = BoundingBox { x1: 0., y1: 0., x2: 10., y2: 10. };
        let b = BoundingBox { x1: 20., y1: 20., x2: 30., y2: 30. };

        assert_eq!(a.iou(&b), 0.);
        assert_eq!(a.iou(&a), 1.);
    }
}
