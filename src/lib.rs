//! Watcher agent
//!
//! Embedded visual-monitoring agent: capture frames, run object detection
//! only when the scene changes, and ship the freshest annotated frame to a
//! remote aggregator over a chunked TCP protocol.
//!
//! # Architecture
//!
//! Every background activity runs on its own `WorkerLoop` thread. Threads
//! exchange data only through `LatestSlot`s (newest value wins) and
//! registered callbacks, so a slow consumer never queues up stale work.
//!
//! # Module Structure
//!
//! - `worker`, `slot`, `listeners`: threading primitives
//! - `detect`: inference seam and `MotionGatedDetector`
//! - `wire`: packet framing and GET/POST `Protocol`
//! - `upload`: background `Uploader`
//! - `ingest`: frame sources and `AsyncCapture`
//! - `assets`: startup model fetch with retry
//! - `config`: `AgentConfig` (file + environment)

pub mod assets;
pub mod config;
pub mod detect;
pub mod frame;
pub mod frequency;
pub mod ingest;
pub mod listeners;
pub mod slot;
pub mod upload;
pub mod wire;
pub mod worker;

pub use assets::{fetch_assets, retry_with_delay, AssetKeys, ModelAssets};
pub use config::AgentConfig;
pub use detect::{
    AssetSource, Detection, DetectionResult, InferenceEngine, LabelFilter, MotionConfig,
    MotionGatedDetector, StubEngine,
};
pub use frame::{monotonic_ms, Frame};
pub use frequency::Frequency;
pub use ingest::{open_source, AsyncCapture, FrameSource};
pub use listeners::{ListenerId, ListenerList};
pub use slot::LatestSlot;
pub use upload::{UploadConfig, UploadStats, Uploader};
pub use wire::{ByteStreamClient, Packet, Protocol, Response, TcpClient, WireError, WireHeader};
pub use worker::WorkerLoop;
