//! Longwave radiative fluxes in partially cloudy columns
//!
//! Sub-grid cloud is represented with the Tripleclouds (or Doubleclouds)
//! assumption: each layer is split into a clear region and one or two cloudy
//! regions, which are overlapped between layers with the Hogan and
//! Illingworth (2000) exponential-random scheme. Fluxes come either straight
//! from a two-stream solver or from radiances at a set of zenith angles. See
//! [`tcrad`] for the entry points.
//!
//! NOTE: with the `python` feature enabled this crate also builds a Python
//! extension module, but only the `python` module uses `pyo3`. Everything
//! else is plain Rust.

pub mod error;
#[cfg(feature = "python")]
mod python;
pub mod tcrad;

pub use error::TcradError;
pub use tcrad::{
    calc_flux, calc_no_scattering_flux, CloudScattering, Column, FluxConfig, FluxOutputs,
    FluxProfile,
};
