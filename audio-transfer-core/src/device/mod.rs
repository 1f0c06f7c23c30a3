//! In-process device collaborators.
//!
//! [`SimulatedPcm`] and [`SimulatedClient`] implement the device traits
//! entirely in memory. They back the test suite and let callers exercise
//! fault handling (xruns, suspends, short commits) deterministically.

pub mod simulated;

pub use simulated::{FaultPoint, SimulatedClient, SimulatedPcm};
