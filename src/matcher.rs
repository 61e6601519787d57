use crate::gallery::Gallery;
use crate::Embedding;

/// Largest face distance accepted as the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    Known {
        index: usize,
        name: String,
        distance: f32,
    },
    Unknown {
        /// Distance to the closest known face, if there is any
        nearest: Option<f32>,
    },
}

/// Distance from `probe` to every known face, in gallery order.
pub fn face_distances(gallery: &Gallery, probe: &Embedding) -> Vec<f32> {
    gallery
        .faces()
        .iter()
        .map(|known| facecam_vision::face::face_distance(&known.embedding, probe))
        .collect()
}

/// Nearest known face, accepted when its distance is within `tolerance`.
/// Ties go to the face loaded first; non-finite distances never match.
pub fn best_match(gallery: &Gallery, probe: &Embedding, tolerance: f32) -> Match {
    let nearest = face_distances(gallery, probe)
        .into_iter()
        .enumerate()
        .filter(|(_, d)| d.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        });

    match nearest {
        Some((index, distance)) if distance <= tolerance => Match::Known {
            index,
            name: gallery.faces()[index].name.clone(),
            distance,
        },
        other => Match::Unknown {
            nearest: other.map(|(_, d)| d),
        },
    }
}
