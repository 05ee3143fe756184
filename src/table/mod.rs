//! 轨迹表输入
//!
//! 最小化的行结构与逐块读取接口；轨迹由外部拟合步骤产生。

pub mod record;
pub mod source;

pub use record::{DutHit, TrackRecord};
pub use source::{JsonlTrackReader, MemoryTrackSource, TrackChunkSource};
