//! `jobplane` — a coordination server for a farm of worker machines that transcode and mux media
//! by invoking an external media-processing tool.
//!
//! This crate provides:
//! - Deterministic request decomposition into unit jobs (`planner`)
//! - Command-line synthesis for the transcoder (`arg_builder`)
//! - A durable, lease-based job queue with at-most-one-in-flight dispatch (`repository`,
//!   `dispatcher`)
//! - Request validation and orchestration (`request_service`)
//!
//! The library is designed to be embedded by both a standalone HTTP server binary and test/local
//! tooling, with an emphasis on keeping the core decomposition and dispatch logic independent of
//! any particular storage engine or HTTP framework.

// Pure command-line synthesis for the external media tool.
pub mod arg_builder;

// Pure request decomposition into unit jobs and parts.
pub mod planner;

// Shared data model (Request, Job, Part, WorkerHeartbeat).
pub mod domain;

// `MediaProbe` collaborator: duration/framerate via `ffprobe`.
pub mod media_probe;

// Durable persistence: the `JobRepository` trait plus in-memory/Postgres implementations.
pub mod repository;

// Transactional lease state machine over a `JobRepository`.
pub mod dispatcher;

// Orchestrates decomposition + persistence for incoming requests.
pub mod request_service;

// Typed configuration threaded explicitly into constructors.
pub mod config;

// Crate-wide tagged error type.
pub mod error;

// Logging configuration and control.
pub mod logging;

pub use config::Config;
pub use dispatcher::{DispatchMetrics, Dispatcher, TranscodingJob};
pub use error::{Error, Result};
pub use logging::init as init_logging;
pub use repository::JobRepository;
pub use request_service::{RequestService, SubmitMetrics, SubmitMuxRequest, SubmitRequest};
