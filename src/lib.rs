//! hidscope: HID traffic monitor built on the `hidscope-capture` pipeline.
//!
//! The library side holds the presentation layer (filtering, text/JSON
//! printing, TUI panel) and the command handlers; capture itself lives in
//! the `hidscope-capture` crate.

pub mod cli;
pub mod commands;
pub mod filter;
pub mod format;
pub mod printer;
pub mod tui;
