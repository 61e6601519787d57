use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};

/// YuNet input resolution.
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// SFace input resolution.
pub const RECOGNIZER_INPUT_SIZE: u32 = 112;

/// ArcFace reference eye positions for a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// Detection result from YuNet, in source image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // right eye, left eye, nose, right mouth, left mouth
}

impl Detection {
    /// Multiply every coordinate by `factor`, e.g. to map a detection made on
    /// a downscaled frame back to the full frame.
    pub fn scaled(&self, factor: f32) -> Detection {
        let mut out = self.clone();
        out.bbox.iter_mut().for_each(|v| *v *= factor);
        out.landmarks.iter_mut().for_each(|v| *v *= factor);
        out
    }

    /// Integer box clamped to a `width` x `height` frame.
    pub fn bounding_box(&self, width: u32, height: u32) -> BoundingBox {
        let [x, y, w, h] = self.bbox;
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        BoundingBox {
            top: clamp(y, height),
            right: clamp(x + w, width),
            bottom: clamp(y + h, height),
            left: clamp(x, width),
        }
    }
}

/// Axis-aligned face box in pixel coordinates, edges inclusive of `left`/`top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Face embedding (SFace output), L2-normalized
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Array2<f32>,
}

impl Embedding {
    /// Build an embedding from raw model output, normalizing it.
    pub fn from_vec(values: Vec<f32>) -> Embedding {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values: Vec<f32> = if norm > 0.0 {
            values.into_iter().map(|x| x / norm).collect()
        } else {
            values
        };
        let len = values.len();
        Embedding {
            vector: Array2::from_shape_vec((1, len), values)
                .unwrap_or_else(|_| Array2::zeros((1, len))),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.vector.iter().copied()
    }
}

/// Aspect-preserving fit of a source image into a square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    offset_x: u32,
    offset_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: u32) -> Letterbox {
        let scale = target as f32 / width.max(height) as f32;
        let new_w = (width as f32 * scale) as u32;
        let new_h = (height as f32 * scale) as u32;
        Letterbox {
            scale,
            offset_x: (target - new_w.min(target)) / 2,
            offset_y: (target - new_h.min(target)) / 2,
        }
    }

    fn apply(&self, img: &DynamicImage, target: u32) -> RgbImage {
        let (w, h) = img.dimensions();
        let new_w = ((w as f32 * self.scale) as u32).max(1);
        let new_h = ((h as f32 * self.scale) as u32).max(1);
        let resized = img
            .resize_exact(new_w, new_h, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let mut canvas = RgbImage::new(target, target);
        image::imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas
    }

    /// Map a model-space pixel coordinate back into the source image.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Planar BGR f32 tensor of shape [1, 3, H, W] with values in [0, 255].
fn bgr_planar_tensor(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    let (b, rest) = data.split_at_mut(plane);
    let (g, r) = rest.split_at_mut(plane);
    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces in an image using YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT_SIZE;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Ok(vec![]);
    }
    let letterbox = Letterbox::fit(width, height, target);
    let input = bgr_planar_tensor(&letterbox.apply(img, target))?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;

    let mut tensors: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        tensors.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let views: Vec<(&[i64], &[f32])> = tensors
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let strides = yunet::parse_outputs(&views, target as usize)?;
    let raw = yunet::decode_detections(&strides, score_threshold, target as usize)?;
    log::trace!("yunet produced {} candidates", raw.len());

    let size = target as f32;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = letterbox.to_source(d.bbox[0] * size, d.bbox[1] * size);
            let mut landmarks = [0.0f32; 10];
            for p in 0..5 {
                let (lx, ly) =
                    letterbox.to_source(d.landmarks[p * 2] * size, d.landmarks[p * 2 + 1] * size);
                landmarks[p * 2] = lx;
                landmarks[p * 2 + 1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    d.bbox[2] * size / letterbox.scale,
                    d.bbox[3] * size / letterbox.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        Ok(nms(&detections, nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Apply non-maximum suppression to remove overlapping detections.
/// Output is ordered by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

pub fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Rotation + uniform scale + translation: `out = M * in + t`.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Transform taking the detected eyes onto the reference eyes of a
    /// `size` x `size` crop.
    fn from_eyes(first_eye: (f32, f32), second_eye: (f32, f32), size: u32) -> Option<Similarity> {
        let k = size as f32 / RECOGNIZER_INPUT_SIZE as f32;
        let dx = second_eye.0 - first_eye.0;
        let dy = second_eye.1 - first_eye.1;
        let dist = (dx * dx + dy * dy).sqrt();
        if !dist.is_finite() || dist < f32::EPSILON {
            return None;
        }

        let ref_dx = REF_RIGHT_EYE.0 - REF_LEFT_EYE.0;
        let ref_dy = REF_RIGHT_EYE.1 - REF_LEFT_EYE.1;
        let ref_dist = (ref_dx * ref_dx + ref_dy * ref_dy).sqrt();
        let scale = k * ref_dist / dist;
        let angle = dy.atan2(dx) - ref_dy.atan2(ref_dx);
        let (sin, cos) = angle.sin_cos();

        let a = scale * cos;
        let b = scale * sin;
        let c = -scale * sin;
        let d = scale * cos;

        let center = ((first_eye.0 + second_eye.0) / 2.0, (first_eye.1 + second_eye.1) / 2.0);
        let ref_center = (
            (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * k,
            (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * k,
        );
        Some(Similarity {
            a,
            b,
            c,
            d,
            tx: ref_center.0 - (a * center.0 + b * center.1),
            ty: ref_center.1 - (c * center.0 + d * center.1),
        })
    }

    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.d - self.b * self.c;
        let px = x - self.tx;
        let py = y - self.ty;
        (
            (self.d * px - self.b * py) / det,
            (-self.c * px + self.a * py) / det,
        )
    }
}

fn sample_bilinear(src: &RgbImage, x: f32, y: f32) -> Option<image::Rgb<u8>> {
    let (w, h) = src.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_pixel(x0, y0);
    let p10 = src.get_pixel(x1, y0);
    let p01 = src.get_pixel(x0, y1);
    let p11 = src.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (ch, v) in out.iter_mut().enumerate() {
        let top = p00[ch] as f32 * (1.0 - fx) + p10[ch] as f32 * fx;
        let bottom = p01[ch] as f32 * (1.0 - fx) + p11[ch] as f32 * fx;
        *v = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(image::Rgb(out))
}

/// Align and crop face using the eye landmarks.
///
/// YuNet reports the eye on the image's left first, which is the ArcFace
/// template's left eye as well.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let first_eye = (detection.landmarks[0], detection.landmarks[1]);
    let second_eye = (detection.landmarks[2], detection.landmarks[3]);
    let transform = Similarity::from_eyes(first_eye, second_eye, size)
        .ok_or_else(|| anyhow::anyhow!("degenerate eye landmarks"))?;

    let src = img.to_rgb8();
    let mut output = RgbImage::new(size, size);
    for (x, y, px) in output.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(x as f32, y as f32);
        if let Some(sample) = sample_bilinear(&src, sx, sy) {
            *px = sample;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode face image to embedding using SFace
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let size = RECOGNIZER_INPUT_SIZE;
    let face = if face_img.dimensions() == (size, size) {
        face_img.to_rgb8()
    } else {
        face_img
            .resize_exact(size, size, image::imageops::FilterType::Triangle)
            .to_rgb8()
    };

    let input = bgr_planar_tensor(&face)?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, 128]
    let len = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if len == 0 || len > data.len() {
        anyhow::bail!(
            "unexpected recognizer output shape {:?}",
            shape.iter().collect::<Vec<_>>()
        );
    }

    Ok(Embedding::from_vec(data[..len].to_vec()))
}

/// Cosine similarity between two embeddings, in [-1, 1]
pub fn match_embedding(a: &Embedding, b: &Embedding) -> f32 {
    // both sides are L2-normalized, so the dot product is the cosine
    let dot: f32 = a.values().zip(b.values()).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}

/// Dissimilarity between two embeddings: `1 - cosine similarity`, in [0, 2]
pub fn face_distance(a: &Embedding, b: &Embedding) -> f32 {
    1.0 - match_embedding(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms() {
        let detections = vec![
            det([10.0, 10.0, 20.0, 20.0], 0.9),
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn letterbox_round_trips_coordinates() {
        let lb = Letterbox::fit(1280, 720, 640);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.offset_x, 0);
        assert_eq!(lb.offset_y, 140);

        // source (200, 100) lands at (100, 190) in model space
        let (x, y) = lb.to_source(100.0, 190.0);
        assert!((x - 200.0).abs() < 1e-4);
        assert!((y - 100.0).abs() < 1e-4);
    }

    #[test]
    fn bgr_tensor_swaps_channels() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([10, 20, 30]));
        let t = bgr_planar_tensor(&img).unwrap();
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t[[0, 0, 0, 0]], 30.0);
        assert_eq!(t[[0, 1, 0, 0]], 20.0);
        assert_eq!(t[[0, 2, 0, 0]], 10.0);
    }

    #[test]
    fn scaled_detection_and_clamped_box() {
        let d = Detection {
            bbox: [10.0, 20.0, 30.0, 40.0],
            score: 0.9,
            landmarks: [1.0; 10],
        };
        let big = d.scaled(4.0);
        assert_eq!(big.bbox, [40.0, 80.0, 120.0, 160.0]);
        assert_eq!(big.landmarks, [4.0; 10]);
        assert_eq!(big.score, 0.9);

        let b = big.bounding_box(100, 200);
        assert_eq!(
            b,
            BoundingBox {
                top: 80,
                right: 100,
                bottom: 200,
                left: 40
            }
        );
        assert_eq!(b.width(), 60);
        assert!(!b.is_empty());
    }

    #[test]
    fn align_maps_eyes_onto_template() {
        // eyes already at template positions in a 112x112 image: identity transform
        let mut img = RgbImage::new(112, 112);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = image::Rgb([x as u8, y as u8, 0]);
        }
        let mut landmarks = [0.0f32; 10];
        landmarks[0] = REF_LEFT_EYE.0;
        landmarks[1] = REF_LEFT_EYE.1;
        landmarks[2] = REF_RIGHT_EYE.0;
        landmarks[3] = REF_RIGHT_EYE.1;
        let d = Detection {
            bbox: [0.0, 0.0, 112.0, 112.0],
            score: 1.0,
            landmarks,
        };

        let aligned = align_face(&DynamicImage::ImageRgb8(img), &d, 112)
            .unwrap()
            .to_rgb8();
        let px = aligned.get_pixel(50, 60);
        assert!((px[0] as i32 - 50).abs() <= 1);
        assert!((px[1] as i32 - 60).abs() <= 1);
    }

    #[test]
    fn align_rejects_coincident_eyes() {
        let img = DynamicImage::new_rgb8(10, 10);
        let d = Detection {
            bbox: [0.0, 0.0, 10.0, 10.0],
            score: 1.0,
            landmarks: [5.0; 10],
        };
        assert!(align_face(&img, &d, 112).is_err());
    }

    #[test]
    fn distance_is_one_minus_cosine() {
        let a = Embedding::from_vec(vec![3.0, 4.0]);
        let b = Embedding::from_vec(vec![3.0, 4.0]);
        let c = Embedding::from_vec(vec![-4.0, 3.0]);
        assert!(face_distance(&a, &b).abs() < 1e-6);
        assert!((face_distance(&a, &c) - 1.0).abs() < 1e-6);
        assert!((match_embedding(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(a.len(), 2);
        assert!((a.vector[[0, 0]] - 0.6).abs() < 1e-6);
    }
}
