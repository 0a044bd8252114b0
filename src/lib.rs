//! vimana-io - Drone transport subsystem
//!
//! Ground-side transport for a Tello-class quadcopter: a
//! single-outstanding UDP command link, a symbolic command translator,
//! a dead-reckoning position estimator with geofence and return-home
//! planning, and a UDP H.264 video pipeline with pluggable decode
//! strategies feeding a single-slot JPEG cache.
//!
//! [`DroneBridge`] is the composed surface most callers want; the
//! individual layers stay public for tooling and tests.

pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod link;
pub mod position;
pub mod video;

pub use bridge::DroneBridge;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use position::PositionSnapshot;
pub use video::FrameCache;
