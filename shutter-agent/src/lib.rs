//! # shutter-agent: remote capture agent
//!
//! Connects to a controller over a websocket and answers its
//! `OPEN_CAMERA` / `TAKE_PHOTO` commands with `RECEIVE_PHOTO` artifacts.
//!
//! The camera is stood in for by [`sensor::FileSensor`], which serves a
//! still image from disk after a simulated warm-up. Oversized photos are
//! re-encoded by [`reencode::JpegReencoder`].
//!
//! ## Modes
//!
//! - **Console** (default): stdin commands `capture`, `endpoint <url>`,
//!   `status`, `quit`.
//! - **Headless** (`--headless`): no stdin; stop with Ctrl-C.

pub mod config;
pub mod console;
pub mod presentation;
pub mod reencode;
pub mod sensor;
