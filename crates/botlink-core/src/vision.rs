//! Vision service boundary
//!
//! The marker-detection pipeline is an external collaborator: this
//! module defines only the call signature and result shape the core
//! consumes, never the detection algorithm.

use serde::{Deserialize, Serialize};

/// A camera frame handed to the detector, opaque to the core
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Raw pixel data in whatever layout the detector was configured for
    pub data: Vec<u8>,
}

/// The pose of one detected fiducial marker, relative to the camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerPose {
    /// Marker id as printed/encoded on the fiducial
    pub id: u32,
    /// Straight-line distance to the marker centre, millimetres
    pub distance_mm: f64,
    /// Horizontal angle to the marker, radians, positive to the right
    pub azimuth: f64,
    /// Vertical angle to the marker, radians, positive upwards
    pub elevation: f64,
}

/// Anything that can turn frames into marker poses
pub trait MarkerSource {
    fn detect_markers(&mut self, frame: &Frame) -> anyhow::Result<Vec<MarkerPose>>;
}
