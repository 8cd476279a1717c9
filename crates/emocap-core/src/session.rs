//! Capture-label-persist loop.
//!
//! One iteration: grab a frame, mirror it, ask the provider for a face mesh,
//! read one keystroke, then draw, maybe save, maybe switch label, maybe exit.
//! The camera and the display are released exactly once on every way out of
//! the loop, including a failed write and a dropped session.

use crate::counter::SampleCounter;
use crate::dataset::{DatasetError, SampleWriter};
use crate::labels::{Emotion, KeyEvent, LabelRegistry, RawKey};
use crate::types::{LandmarkProvider, LandmarkVector, Sample};
use emocap_hw::{Camera, CameraError, Frame};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to persist sample: {0}")]
    Dataset(#[from] DatasetError),
}

/// Where frames come from. Acquisition failure ends the session.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
    fn release(&mut self);
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn release(&mut self) {
        Camera::release(self);
    }
}

/// Non-blocking keystroke input with a small wait budget.
pub trait KeySource {
    /// Next pending key, or [`RawKey::None`] if nothing arrived within `timeout`.
    fn poll_key(&mut self, timeout: Duration) -> RawKey;
}

/// Operator-facing overlay and display. Has no effect on stored data.
pub trait Renderer {
    type Error: std::fmt::Display;

    fn draw_overlay(&mut self, frame: &mut Frame, overlay: &Overlay<'_>);
    fn display(&mut self, frame: &Frame) -> Result<(), Self::Error>;
    fn close(&mut self);
}

/// What the renderer should show for the current frame.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    /// Detected mesh, or `None` when no face was found.
    pub landmarks: Option<&'a LandmarkVector>,
    pub label: Emotion,
    pub count: u64,
    /// Latest operator notice ("saved ...", "switched to ...").
    pub notice: Option<&'a str>,
}

impl Overlay<'_> {
    pub fn status_text(&self) -> String {
        match self.landmarks {
            Some(_) => format!("Label: {} (Samples: {})", self.label, self.count),
            None => "No face detected".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Operator pressed the exit key.
    Quit,
    /// The camera stopped delivering frames.
    CameraClosed,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long each iteration waits for a keystroke.
    pub key_timeout: Duration,
    pub initial_label: Emotion,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            key_timeout: Duration::from_millis(1),
            initial_label: Emotion::default(),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// `None` only if the loop ended on an error.
    pub exit: Option<ExitReason>,
    pub frames: u64,
    /// Samples saved during this session, per label.
    pub saved: BTreeMap<Emotion, u64>,
}

/// The capture session state machine.
pub struct CaptureSession<S, P, W, U>
where
    S: FrameSource,
    P: LandmarkProvider,
    W: SampleWriter,
    U: Renderer + KeySource,
{
    source: S,
    provider: P,
    writer: W,
    ui: U,
    current_label: Emotion,
    counter: SampleCounter,
    saved: BTreeMap<Emotion, u64>,
    state: SessionState,
    exit: Option<ExitReason>,
    frames: u64,
    key_timeout: Duration,
    notice: Option<String>,
    released: bool,
}

impl<S, P, W, U> CaptureSession<S, P, W, U>
where
    S: FrameSource,
    P: LandmarkProvider,
    W: SampleWriter,
    U: Renderer + KeySource,
{
    /// Build a session around already-opened resources.
    ///
    /// `counter` is usually empty; pass a seeded one to continue counts from
    /// an existing dataset.
    pub fn new(
        source: S,
        provider: P,
        writer: W,
        ui: U,
        counter: SampleCounter,
        options: SessionOptions,
    ) -> Self {
        Self {
            source,
            provider,
            writer,
            ui,
            current_label: options.initial_label,
            counter,
            saved: BTreeMap::new(),
            state: SessionState::Running,
            exit: None,
            frames: 0,
            key_timeout: options.key_timeout,
            notice: None,
            released: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_label(&self) -> Emotion {
        self.current_label
    }

    pub fn counter(&self) -> &SampleCounter {
        &self.counter
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Run iterations until the session exits, then release resources.
    ///
    /// A write failure ends the loop and is returned after release.
    pub fn run(&mut self) -> Result<SessionReport, SessionError> {
        tracing::info!(label = %self.current_label, "capture session started");

        let outcome = loop {
            match self.step() {
                Ok(SessionState::Running) => continue,
                Ok(SessionState::Exiting) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.release();

        let report = self.report();
        match outcome {
            Ok(()) => {
                tracing::info!(
                    exit = ?report.exit,
                    frames = report.frames,
                    saved = ?report.saved,
                    "capture session ended"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(error = %e, frames = report.frames, "capture session aborted");
                Err(e)
            }
        }
    }

    /// Run exactly one iteration of the loop.
    pub fn step(&mut self) -> Result<SessionState, SessionError> {
        if self.state == SessionState::Exiting {
            return Ok(self.state);
        }

        let mut frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::info!(error = %e, "camera stopped delivering frames");
                self.finish(ExitReason::CameraClosed);
                return Ok(self.state);
            }
        };
        self.frames += 1;
        frame.mirror_horizontal();

        let face = match self.provider.detect(&frame) {
            Ok(faces) => faces.into_iter().next(),
            Err(e) => {
                tracing::warn!(error = %e, "landmark detection failed; treating frame as empty");
                None
            }
        };

        let event = LabelRegistry::translate(self.ui.poll_key(self.key_timeout));

        match &face {
            Some(landmarks) => {
                let overlay = Overlay {
                    landmarks: Some(landmarks),
                    label: self.current_label,
                    count: self.counter.get(self.current_label),
                    notice: self.notice.as_deref(),
                };
                self.ui.draw_overlay(&mut frame, &overlay);
                if event == KeyEvent::Save {
                    self.save(landmarks)?;
                }
            }
            None => {
                let overlay = Overlay {
                    landmarks: None,
                    label: self.current_label,
                    count: self.counter.get(self.current_label),
                    notice: self.notice.as_deref(),
                };
                self.ui.draw_overlay(&mut frame, &overlay);
                if event == KeyEvent::Save {
                    tracing::debug!("save ignored: no face in frame");
                }
            }
        }

        if let KeyEvent::Switch(label) = event {
            if label != self.current_label {
                tracing::info!(from = %self.current_label, to = %label, "switched label");
            }
            self.current_label = label;
            self.notice = Some(format!("Switched to label: {label}"));
        }

        if event == KeyEvent::Quit {
            tracing::info!("exit requested");
            self.finish(ExitReason::Quit);
            return Ok(self.state);
        }

        if let Err(e) = self.ui.display(&frame) {
            tracing::warn!(error = %e, "display failed");
        }

        Ok(self.state)
    }

    /// Snapshot of the session so far.
    pub fn report(&self) -> SessionReport {
        SessionReport {
            exit: self.exit,
            frames: self.frames,
            saved: self.saved.clone(),
        }
    }

    /// Append one row, then count it. Nothing is counted if the write fails.
    fn save(&mut self, landmarks: &LandmarkVector) -> Result<(), SessionError> {
        let label = self.current_label;
        self.writer.append(&Sample::new(label, landmarks.clone()))?;

        let total = self.counter.increment(label);
        *self.saved.entry(label).or_insert(0) += 1;
        tracing::info!(label = %label, total, "sample saved");
        self.notice = Some(format!("Saved {label} sample, total: {total}"));
        Ok(())
    }

    fn finish(&mut self, reason: ExitReason) {
        self.state = SessionState::Exiting;
        self.exit = Some(reason);
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.source.release();
        self.ui.close();
    }
}

impl<S, P, W, U> Drop for CaptureSession<S, P, W, U>
where
    S: FrameSource,
    P: LandmarkProvider,
    W: SampleWriter,
    U: Renderer + KeySource,
{
    fn drop(&mut self) {
        self.release();
    }
}
