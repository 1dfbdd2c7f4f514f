//! Test doubles for running a session without a network

pub mod mocks;

pub use mocks::*;
