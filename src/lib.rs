//! # ECG Stream Core Library
//!
//! This crate is the core library for the `ecg_stream` application: a
//! real-time pipeline that reads three-channel biosignal samples from a sensor
//! front end whenever it signals data-ready, and streams them to a remote
//! receiver as batched UDP datagrams. The binary (`main.rs`) wires it to a
//! simulated front end; the same library drives real hardware through the
//! [`sensor::SensorBus`] trait.
//!
//! ## Data flow
//!
//! ```text
//! edge ─► EdgeGate ─► SampleReader ─► sample queue ─► Packetizer ─► UDP
//! ```
//!
//! Every stage drops rather than blocks when the next one is saturated: shed
//! edges, dropped queue pushes and discarded failed sends are all counted in
//! [`stats::PipelineStats`] and never stall acquisition.
//!
//! ## Crate Structure
//!
//! - **`sample`**: `Sample`, 24-bit reconstruction, calibration and the text wire record.
//! - **`gate`**: `EdgeGate`, the re-entrancy guard between edges and the reader.
//! - **`queue`**: Bounded single-producer/single-consumer sample queue with drop-on-full.
//! - **`reader`**: `SampleReader` task, one acquisition per admitted edge.
//! - **`packetizer`**: Datagram batching and the `DatagramSink` transport seam.
//! - **`link`**: Network link state reported by the connectivity layer.
//! - **`sensor`**: `SensorBus` trait, register map, streaming setup, diagnostics and
//!   the simulated front end.
//! - **`receiver`**: Decoding of received datagrams.
//! - **`pipeline`**: Startup sequencing and the running `PipelineHandle`.
//! - **`stats`**: Atomic counters for every stage.
//! - **`config`**: Figment-based configuration (TOML plus environment).
//! - **`logging`**: Tracing subscriber initialization.
//! - **`error`**: The `StreamError` enum for centralized error handling.

pub mod config;
pub mod error;
pub mod gate;
pub mod link;
pub mod logging;
pub mod packetizer;
pub mod pipeline;
pub mod queue;
pub mod reader;
pub mod receiver;
pub mod sample;
pub mod sensor;
pub mod stats;

pub use error::{AppResult, StreamError};
pub use pipeline::{Pipeline, PipelineContext, PipelineHandle};
pub use sample::{Record, Sample};
