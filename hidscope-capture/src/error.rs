//! Capture error types

use thiserror::Error;

use crate::envelope::TabId;

/// Errors that can occur in the capture pipeline
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Tab not found: {0}")]
    TabNotFound(TabId),

    #[error("Device not open")]
    DeviceNotOpen,

    #[error("Message bus closed")]
    BusClosed,

    // HID-specific errors
    #[error("HID error: {0}")]
    HidError(String),

    #[error("HID permission denied: {0}")]
    HidPermissionDenied(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<hidapi::HidError> for CaptureError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") {
            CaptureError::HidPermissionDenied(msg)
        } else {
            CaptureError::HidError(msg)
        }
    }
}
