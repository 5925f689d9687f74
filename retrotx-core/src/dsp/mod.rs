//! Sample-rate primitives: exact rationals, oscillators, FIR and IIR
//! filters, and the FM over-drive limiter.

pub mod fir;
pub mod iir;
pub mod limiter;
pub mod nco;
pub mod rational;

pub use fir::{FirComplex, FirInt16, FirInt32};
pub use iir::IirInt16;
pub use limiter::Limiter;
pub use nco::{EnergyDispersal, FmModulator, Nco};
pub use rational::Rational;
