//! Chessboard target detection and correspondence assembly.
//!
//! The detection pipeline is split into independently testable stages:
//! [`threshold`] binarizes the image, [`quads`] extracts the black squares
//! and derives internal-corner candidates, [`lattice`] orders them into a
//! validated grid, and [`subpix`] refines each corner. [`detector`] drives
//! the stages; [`target`] holds the board geometry and the accumulated
//! 2D/3D correspondences.

pub mod detector;
pub mod lattice;
pub mod quads;
pub mod subpix;
pub mod target;
pub mod threshold;

pub use detector::{detect_chessboard, ChessboardDetector, DetectionResult, DetectorParams};
pub use target::{Correspondences, PatternGeometry};
