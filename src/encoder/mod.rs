//! Winch Encoder Module
//!
//! Polls a Kübler Codex 560 counter over Modbus RTU, turns the cable-out
//! reading into depth and velocity, and publishes both to Redis.

pub mod codex560;
pub mod poll_loop;
pub mod publish;
pub mod registers;
pub mod velocity;

pub use codex560::{Codex560, Counter, Preset};
pub use poll_loop::{EncoderLoop, EncoderLoopSettings, EncoderStats};
pub use publish::{EncoderPayload, PublishError, PublishSink, RedisPublisher};
pub use registers::{CounterError, CounterLink, ModbusRegisters, RegisterAccess};
pub use velocity::{
    estimate, DecayConstants, Estimate, EstimateError, EstimatorState, Sample, SmoothedVelocity,
};
