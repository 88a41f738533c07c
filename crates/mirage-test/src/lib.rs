//! Test harnesses for the Mirage gateway emulator.
//!
//! Provides `TestGateway`, an in-process gateway on a random port, and
//! `StubBackend`, a recording backend with canned replies.

pub mod backend;
pub mod gateway;
#[cfg(test)]
mod scenarios;

pub use backend::{Invocation, StubBackend};
pub use gateway::{TestError, TestGateway};
