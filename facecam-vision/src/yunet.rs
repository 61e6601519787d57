//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every cell of the stride 8, 16 and 32 feature maps
//! predicts one face. For each stride the network emits
//! - cls: [1, H*W, 1] class probability
//! - obj: [1, H*W, 1] objectness probability
//! - bbox: [1, H*W, 4] (dx, dy) in stride units, (dw, dh) as log stride units
//! - kps: [1, H*W, 10] five (x, y) landmark offsets in stride units
//!
//! grouped by kind: cls_8, cls_16, cls_32, obj_8, ..., kps_32.

use anyhow::Result;
use ndarray::{Array2, ArrayView2};

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Number of output tensors produced by the 2023mar model.
pub const OUTPUT_COUNT: usize = 4 * STRIDES.len();

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5 (normalized [0,1])
}

/// Decoded tensors for a single stride.
#[derive(Debug, Clone)]
pub struct StrideOutput {
    pub stride: usize,
    /// Combined face score per cell, shape [H*W, 1]
    pub scores: Array2<f32>,
    /// Box deltas per cell, shape [H*W, 4]
    pub boxes: Array2<f32>,
    /// Landmark deltas per cell, shape [H*W, 10]
    pub landmarks: Array2<f32>,
}

impl StrideOutput {
    pub fn grid_size(&self, input_size: usize) -> usize {
        input_size / self.stride
    }
}

fn tensor_view<'a>(
    outputs: &'a [(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: i64,
    kind: &str,
) -> Result<ArrayView2<'a, f32>> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing {} output at index {}", kind, index))?;
    if shape.len() != 3 || shape[0] != 1 || shape[2] != width {
        anyhow::bail!(
            "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            kind,
            index,
            shape,
            cells,
            width
        );
    }
    if shape[1] as usize != cells {
        anyhow::bail!(
            "expected {} cells for {} at index {}, got {}",
            cells,
            kind,
            index,
            shape[1]
        );
    }
    Ok(ArrayView2::from_shape((cells, width as usize), *data)?)
}

/// Split the flat list of model outputs into per-stride tensors.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideOutput>> {
    if outputs.len() < OUTPUT_COUNT {
        anyhow::bail!(
            "detector produced {} outputs, expected {}",
            outputs.len(),
            OUTPUT_COUNT
        );
    }

    let n = STRIDES.len();
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| -> Result<StrideOutput> {
            let grid = input_size / stride;
            let cells = grid * grid;
            let cls = tensor_view(outputs, i, cells, 1, "cls")?;
            let obj = tensor_view(outputs, n + i, cells, 1, "obj")?;
            let boxes = tensor_view(outputs, 2 * n + i, cells, 4, "bbox")?;
            let landmarks = tensor_view(outputs, 3 * n + i, cells, 10, "kps")?;

            let mut scores = cls.to_owned();
            scores.zip_mut_with(&obj, |c, &o| *c = combine_scores(*c, o));

            Ok(StrideOutput {
                stride,
                scores,
                boxes: boxes.to_owned(),
                landmarks: landmarks.to_owned(),
            })
        })
        .collect()
}

/// Geometric mean of class and objectness probabilities.
pub fn combine_scores(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

/// Decode every cell scoring at least `score_threshold` into a detection
/// normalized against `input_size`.
pub fn decode_detections(
    strides: &[StrideOutput],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();
    let size = input_size as f32;

    for out in strides {
        let grid = out.grid_size(input_size);
        let cells = out.scores.nrows();
        if cells != grid * grid {
            anyhow::bail!(
                "expected {} cells for stride {} ({}x{} grid), got {}",
                grid * grid,
                out.stride,
                grid,
                grid,
                cells
            );
        }
        let stride = out.stride as f32;

        for (idx, score) in out.scores.column(0).iter().copied().enumerate() {
            if score < score_threshold {
                continue;
            }
            let row = (idx / grid) as f32;
            let col = (idx % grid) as f32;
            let b = out.boxes.row(idx);

            let cx = (col + b[0]) * stride / size;
            let cy = (row + b[1]) * stride / size;
            let w = b[2].exp() * stride / size;
            let h = b[3].exp() * stride / size;

            let k = out.landmarks.row(idx);
            let mut landmarks = [0.0f32; 10];
            for p in 0..5 {
                landmarks[p * 2] = (col + k[p * 2]) * stride / size;
                landmarks[p * 2 + 1] = (row + k[p * 2 + 1]) * stride / size;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_stride(stride: usize, input_size: usize) -> StrideOutput {
        let cells = (input_size / stride).pow(2);
        StrideOutput {
            stride,
            scores: Array2::zeros((cells, 1)),
            boxes: Array2::zeros((cells, 4)),
            landmarks: Array2::zeros((cells, 10)),
        }
    }

    #[test]
    fn combined_score_is_geometric_mean() {
        assert!((combine_scores(0.81, 1.0) - 0.9).abs() < 1e-6);
        assert_eq!(combine_scores(0.0, 0.9), 0.0);
        // out-of-range values are clamped
        assert!((combine_scores(1.5, 1.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decodes_single_cell_on_coarsest_grid() {
        let input_size = 640;
        let mut coarse = empty_stride(32, input_size);

        // cell (row 10, col 10) on the 20x20 grid
        let idx = 10 * 20 + 10;
        coarse.scores[[idx, 0]] = 0.9;
        coarse.boxes[[idx, 0]] = 0.5;
        coarse.boxes[[idx, 1]] = 0.3;
        coarse.boxes[[idx, 2]] = 4.0f32.ln();
        coarse.boxes[[idx, 3]] = 4.0f32.ln();

        let strides = vec![
            empty_stride(8, input_size),
            empty_stride(16, input_size),
            coarse,
        ];
        let detections = decode_detections(&strides, 0.5, input_size).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // center (10.5 * 32, 10.3 * 32) / 640 = (0.525, 0.515), size 128 / 640 = 0.2
        assert!((det.bbox[0] - 0.425).abs() < 1e-5);
        assert!((det.bbox[1] - 0.415).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);
        assert!((det.score - 0.9).abs() < 1e-5);
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn zero_size_offset_spans_one_stride() {
        let input_size = 64;
        let mut fine = empty_stride(8, input_size);
        fine.scores[[0, 0]] = 1.0;
        let strides = vec![
            fine,
            empty_stride(16, input_size),
            empty_stride(32, input_size),
        ];
        let detections = decode_detections(&strides, 0.5, input_size).unwrap();
        assert_eq!(detections.len(), 1);
        // exp(0) * 8 / 64
        assert!((detections[0].bbox[2] - 0.125).abs() < 1e-6);
        assert!((detections[0].bbox[3] - 0.125).abs() < 1e-6);
    }

    #[test]
    fn parse_rejects_wrong_cell_count() {
        let shape = [1i64, 10, 1];
        let data = vec![0.0f32; 10];
        let outputs: Vec<(&[i64], &[f32])> = (0..OUTPUT_COUNT)
            .map(|_| (&shape[..], data.as_slice()))
            .collect();
        let err = parse_outputs(&outputs, 640).unwrap_err();
        assert!(err.to_string().contains("expected 6400 cells"));
    }

    #[test]
    fn parse_combines_cls_and_obj() {
        let input_size = 64;
        let counts: Vec<usize> = STRIDES.iter().map(|s| (input_size / s).pow(2)).collect();
        let mut shapes = Vec::new();
        let mut datas = Vec::new();
        for (width, value) in [(1i64, 0.64f32), (1, 1.0), (4, 0.0), (10, 0.0)] {
            for &cells in &counts {
                shapes.push(vec![1i64, cells as i64, width]);
                datas.push(vec![value; cells * width as usize]);
            }
        }
        let outputs: Vec<(&[i64], &[f32])> = shapes
            .iter()
            .zip(datas.iter())
            .map(|(s, d)| (s.as_slice(), d.as_slice()))
            .collect();

        let parsed = parse_outputs(&outputs, input_size).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].scores.nrows(), 64);
        assert!((parsed[2].scores[[0, 0]] - 0.8).abs() < 1e-6);
    }
}
