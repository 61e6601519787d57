//! Background recognition for the live loop.
//!
//! The capture loop hands frames to a single worker thread through a
//! one-slot channel and never waits for it: while the worker is busy new
//! frames are simply not submitted. Finished results land in a
//! [`ResultSlot`] that the loop reads on every frame.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender, TrySendError};
use image::RgbImage;
use parking_lot::Mutex;

use crate::engine::{self, FaceEngine, RecognitionSettings};
use crate::gallery::Gallery;
use crate::overlay::Recognition;

/// Recognitions for one processed frame.
#[derive(Debug, Clone, Default)]
pub struct FrameResult {
    /// Capture sequence number of the frame these results belong to
    pub sequence: u64,
    pub recognitions: Vec<Recognition>,
}

/// Latest published [`FrameResult`], shared between worker and loop.
#[derive(Debug, Clone, Default)]
pub struct ResultSlot {
    inner: Arc<Mutex<Option<Arc<FrameResult>>>>,
}

impl ResultSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current result unless it is newer than `result`.
    /// Returns whether `result` was stored.
    pub fn publish(&self, result: FrameResult) -> bool {
        let mut slot = self.inner.lock();
        if let Some(current) = slot.as_ref() {
            if current.sequence > result.sequence {
                return false;
            }
        }
        *slot = Some(Arc::new(result));
        true
    }

    pub fn latest(&self) -> Option<Arc<FrameResult>> {
        self.inner.lock().clone()
    }
}

struct Job {
    sequence: u64,
    frame: RgbImage,
}

pub struct RecognitionWorker {
    jobs: Option<Sender<Job>>,
    results: ResultSlot,
    handle: Option<JoinHandle<()>>,
}

impl RecognitionWorker {
    /// Start the worker thread. It owns `engine` until [`shutdown`] and
    /// stops once the worker is dropped.
    ///
    /// [`shutdown`]: RecognitionWorker::shutdown
    pub fn spawn<E>(
        mut engine: E,
        gallery: Arc<Gallery>,
        settings: RecognitionSettings,
    ) -> Result<Self>
    where
        E: FaceEngine + Send + 'static,
    {
        let (tx, rx) = bounded::<Job>(1);
        let results = ResultSlot::new();
        let slot = results.clone();

        let handle = std::thread::Builder::new()
            .name("recognition".into())
            .spawn(move || {
                log::debug!("recognition worker started");
                for job in rx.iter() {
                    match engine::recognize_frame(&mut engine, &job.frame, &gallery, &settings) {
                        Ok(recognitions) => {
                            log::trace!(
                                "frame {}: {} face(s)",
                                job.sequence,
                                recognitions.len()
                            );
                            slot.publish(FrameResult {
                                sequence: job.sequence,
                                recognitions,
                            });
                        }
                        Err(e) => log::warn!("frame {}: {:#}", job.sequence, e),
                    }
                }
                log::debug!("recognition worker stopped");
            })
            .context("spawning recognition worker")?;

        Ok(Self {
            jobs: Some(tx),
            results,
            handle: Some(handle),
        })
    }

    /// Queue `frame` unless the worker is still busy. Returns whether the
    /// frame was accepted.
    pub fn try_submit(&self, sequence: u64, frame: RgbImage) -> bool {
        let Some(jobs) = self.jobs.as_ref() else {
            return false;
        };
        match jobs.try_send(Job { sequence, frame }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => {
                log::warn!("recognition worker is gone, dropping frame {}", sequence);
                false
            }
        }
    }

    pub fn latest(&self) -> Option<Arc<FrameResult>> {
        self.results.latest()
    }

    pub fn results(&self) -> ResultSlot {
        self.results.clone()
    }

    /// Stop accepting frames, let the worker finish its current job and
    /// wait for it.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.jobs.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("recognition worker panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for RecognitionWorker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionSettings;
    use crate::gallery::KnownFace;
    use crate::{Detection, Embedding};
    use crossbeam_channel::Receiver;
    use image::DynamicImage;
    use std::time::{Duration, Instant};

    /// Engine that blocks on `gate` before answering, so tests control when
    /// the worker is busy.
    struct GatedEngine {
        gate: Receiver<()>,
    }

    impl FaceEngine for GatedEngine {
        fn faces(
            &mut self,
            _img: &DynamicImage,
            _settings: &DetectionSettings,
        ) -> Result<Vec<(Detection, Embedding)>> {
            self.gate.recv().context("gate closed")?;
            Ok(vec![(
                Detection {
                    bbox: [1.0, 1.0, 4.0, 4.0],
                    score: 0.9,
                    landmarks: [0.0; 10],
                },
                Embedding::from_vec(vec![1.0, 0.0]),
            )])
        }
    }

    struct PanicEngine;

    impl FaceEngine for PanicEngine {
        fn faces(
            &mut self,
            _img: &DynamicImage,
            _settings: &DetectionSettings,
        ) -> Result<Vec<(Detection, Embedding)>> {
            panic!("model exploded")
        }
    }

    fn gallery() -> Arc<Gallery> {
        Arc::new(Gallery::from_faces(vec![KnownFace {
            name: "alice".into(),
            embedding: Embedding::from_vec(vec![1.0, 0.0]),
            color: crate::palette::KNOWN,
        }]))
    }

    fn wait_for(slot: &ResultSlot, sequence: u64) -> Arc<FrameResult> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(r) = slot.latest() {
                if r.sequence >= sequence {
                    return r;
                }
            }
            assert!(Instant::now() < deadline, "no result for frame {sequence}");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn slot_keeps_newest_result() {
        let slot = ResultSlot::new();
        assert!(slot.latest().is_none());
        assert!(slot.publish(FrameResult {
            sequence: 4,
            recognitions: vec![],
        }));
        assert!(!slot.publish(FrameResult {
            sequence: 2,
            recognitions: vec![],
        }));
        assert_eq!(slot.latest().unwrap().sequence, 4);
        assert!(slot.publish(FrameResult {
            sequence: 6,
            recognitions: vec![],
        }));
        assert_eq!(slot.latest().unwrap().sequence, 6);
    }

    #[test]
    fn drops_frames_while_busy_and_publishes_results() {
        let (open, gate) = bounded(0);
        let worker = RecognitionWorker::spawn(
            GatedEngine { gate },
            gallery(),
            RecognitionSettings::default(),
        )
        .unwrap();

        assert!(worker.try_submit(0, RgbImage::new(8, 8)));
        // the worker may or may not have taken job 0 yet; either the queue
        // slot or the engine is occupied, so after one more accepted frame
        // the next one must be refused
        let mut accepted = 0;
        for seq in 1..4 {
            if worker.try_submit(seq, RgbImage::new(8, 8)) {
                accepted += 1;
            }
        }
        assert!(accepted <= 1);

        open.send(()).unwrap();
        let result = wait_for(&worker.results(), 0);
        assert_eq!(result.recognitions.len(), 1);
        assert_eq!(result.recognitions[0].label, "alice");

        if accepted == 1 {
            open.send(()).unwrap();
        }
        drop(open);
        worker.shutdown().unwrap();
    }

    #[test]
    fn shutdown_reports_panics() {
        let worker =
            RecognitionWorker::spawn(PanicEngine, gallery(), RecognitionSettings::default())
                .unwrap();
        assert!(worker.try_submit(0, RgbImage::new(8, 8)));
        let err = worker.shutdown().unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
