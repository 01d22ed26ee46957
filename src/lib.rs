//! # Linear actuator control
//!
//! Drives one linear actuator over a serial line while ingesting motion-capture
//! telemetry over UDP, recording it to CSV on demand, and exposing a full-screen
//! terminal console.
//!
//! ## Threads
//! - **Control loop:** input, state transitions, trial steps, rendering.
//! - **Telemetry receive loop:** one per session, blocks on the socket only.
//! - **Recorder:** one while a recording is active, polls every 10 ms.
//!
//! Only the latest-sample slot and a few atomic flags cross thread boundaries.

pub mod actuator;
pub mod config;
pub mod error;
pub mod session;
pub mod telemetry;

pub use config::Config;
pub use error::AppError;
