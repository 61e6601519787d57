use std::sync::Arc;
use std::time::{Duration, Instant};

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use image::RgbImage;
use log::{debug, error, info, warn};

use crate::config::Config;
use crate::display::Display;
use crate::engine::{self, FaceEngine, RecognitionSettings};
use crate::gallery::Gallery;
use crate::overlay::{self, Recognition};
use crate::worker::RecognitionWorker;
use crate::{Camera, Pipeline};

/// Where frames come from.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RgbImage>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<RgbImage> {
        self.frame()
    }
}

/// Where annotated frames go.
pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()>;
    fn should_close(&self) -> bool;
}

impl FrameSink for Display {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        self.show(frame)
    }

    fn should_close(&self) -> bool {
        Display::should_close(self)
    }
}

/// Decides which captured frames are sent for recognition: frames
/// 0, N, 2N, ... for `every = N`.
#[derive(Debug, Clone)]
pub struct FrameSchedule {
    every: u64,
    count: u64,
}

impl FrameSchedule {
    pub fn new(every: u32) -> Self {
        Self {
            every: every.max(1) as u64,
            count: 0,
        }
    }

    /// Advance by one frame; true if that frame should be processed.
    pub fn tick(&mut self) -> bool {
        let process = self.count % self.every == 0;
        self.count += 1;
        process
    }
}

/// Where recognition happens during the loop.
pub enum Recognizer<E> {
    /// On the capture thread, blocking the frame
    Inline(E),
    /// On a worker thread; the loop shows whatever finished last
    Background(RecognitionWorker),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    /// Frames handed to recognition (inline runs or accepted submissions)
    pub processed: u64,
}

/// Capture, recognize and present frames until the sink asks to close or
/// capture fails.
pub fn run_loop<S, K, E>(
    source: &mut S,
    sink: &mut K,
    recognizer: Recognizer<E>,
    gallery: &Gallery,
    settings: &RecognitionSettings,
    schedule: &mut FrameSchedule,
    font: Option<&FontArc>,
) -> Result<LoopStats>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
    E: FaceEngine,
{
    let mut stats = LoopStats::default();
    let mut inline_results: Vec<Recognition> = Vec::new();
    let (mut inline, worker) = match recognizer {
        Recognizer::Inline(engine) => (Some(engine), None),
        Recognizer::Background(worker) => (None, Some(worker)),
    };

    let mut fps_window = Instant::now();
    let mut fps_frames = 0u32;

    let outcome = loop {
        let mut frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to capture frame: {:#}", e);
                break Ok(());
            }
        };
        let sequence = stats.frames;
        stats.frames += 1;

        if schedule.tick() {
            if let Some(inline) = inline.as_mut() {
                match engine::recognize_frame(inline, &frame, gallery, settings) {
                    Ok(recs) => inline_results = recs,
                    Err(e) => warn!("frame {}: {:#}", sequence, e),
                }
                stats.processed += 1;
            } else if let Some(worker) = worker.as_ref() {
                if worker.try_submit(sequence, frame.clone()) {
                    stats.processed += 1;
                }
            }
        }

        match worker.as_ref().and_then(|w| w.latest()) {
            Some(latest) => overlay::draw(&mut frame, &latest.recognitions, font),
            None => overlay::draw(&mut frame, &inline_results, font),
        }

        if let Err(e) = sink.present(&frame) {
            break Err(e);
        }
        if sink.should_close() {
            break Ok(());
        }

        fps_frames += 1;
        let elapsed = fps_window.elapsed();
        if elapsed >= Duration::from_secs(2) {
            debug!("{:.1} fps", fps_frames as f64 / elapsed.as_secs_f64());
            fps_window = Instant::now();
            fps_frames = 0;
        }
    };

    if let Some(worker) = worker {
        worker.shutdown()?;
    }
    outcome.map(|_| stats)
}

/// Live recognition from the configured camera.
pub fn run(cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut pipeline = Pipeline::new(&cfg.detector_model, &cfg.recognizer_model)
        .context("Failed to initialize face recognition pipeline")?;

    info!("Loading known faces from {}", cfg.faces_dir.display());
    let gallery = Gallery::load(
        &cfg.faces_dir,
        &mut pipeline,
        &cfg.detection(),
        cfg.color_mode,
    )?;
    info!("{} known face(s)", gallery.len());

    let resolution = cfg.resolution.map(|[w, h]| (w, h));
    let mut camera = Camera::open_with_resolution(&cfg.camera, resolution)
        .context("Could not open video stream")?;
    let (width, height) = camera.resolution();
    let mut display = Display::open(&cfg.window_title, width, height)?;
    let font = overlay::load_font(cfg.font.as_deref());

    let settings = cfg.recognition();
    let gallery = Arc::new(gallery);
    let recognizer = if cfg.background {
        Recognizer::Background(RecognitionWorker::spawn(
            pipeline,
            Arc::clone(&gallery),
            settings,
        )?)
    } else {
        Recognizer::Inline(pipeline)
    };
    let mut schedule = FrameSchedule::new(cfg.frame_interval());

    println!("Starting video stream. Press 'q' to quit.");
    let stats = run_loop(
        &mut camera,
        &mut display,
        recognizer,
        &gallery,
        &settings,
        &mut schedule,
        font.as_ref(),
    )?;
    info!(
        "Stopped after {} frame(s), {} recognized",
        stats.frames, stats.processed
    );
    Ok(())
}
