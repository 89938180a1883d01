//! Headless-browser controller.
//!
//! Owns the lifecycle of one Chromium child process and its DevTools
//! connection, and exposes the coarse operations the `browser` tool shims
//! over. All operations serialize behind one async mutex: the runtime has a
//! single browser process and concurrent tool calls queue for it.

mod controller;

pub use controller::{BrowserController, BrowserStatus, TabInfo};
