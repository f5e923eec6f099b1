//! Capture and detection pipeline.
//!
//! Capture side: [`capture::CaptureLoop`] reads a live source through a
//! [`frame::FrameSource`] and hands finished segments to the
//! [`clip_writer::ClipWriter`], which encodes them in the background.
//!
//! Detection side: [`detect::DetectionWorker`] drains the shared backlog,
//! claiming one clip at a time with the distributed lock, scoring it with a
//! [`tracker::Tracker`] and a per-clip [`session::DetectionSession`], and
//! publishing crossings.

pub mod capture;
pub mod clip_writer;
pub mod detect;
pub mod ffmpeg;
pub mod frame;
pub mod imagery;
pub mod session;
pub mod tracker;
