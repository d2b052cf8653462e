// ================================
// src/lib.rs
// ================================
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod lidar;
pub mod params;
pub mod replay;

pub use config::{ControlParameters, NodeConfig, Tuning};
pub use controller::{ActuationCommand, ActuationPublisher, FrameWorker, GapFollowController};
pub use lidar::RangeFrame;
pub use params::{ParameterStore, ParameterUpdate, ParameterWatcher};
