//! pertitle - per-title encoding dataset generator
//!
//! Compiles catalog profiles against a bitrate ladder, runs the encodes with
//! ffmpeg, and records probe metadata plus VMAF for every output.

pub mod catalog;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod error;
pub mod ladder;
pub mod media;
pub mod metadata;
pub mod quality;
pub mod workflow;

pub use error::{Outcome, PertitleError, Result};
