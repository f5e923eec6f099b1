//! Capture/detect service process.
//!
//! One binary, two modes selected by `MODE`: `CAPTURE` records the live
//! source into the clip backlog, `DETECT` drains the backlog. Any number of
//! `DETECT` processes may share one backlog.

pub mod config;
pub mod service;
