//! Conditional-access engines: Videocrypt I/II/S, Nagravision Syster,
//! Discret 11 and Eurocrypt.

pub mod eurocrypt;
pub mod syster;
pub mod syster_des;
pub mod videocrypt;
pub mod videocrypt_keys;
pub mod videocrypts;

pub use eurocrypt::{EcAlgo, Eurocrypt};
pub use syster::{Syster, SysterVariant};
pub use videocrypt::{Vc1Mode, Vc2Mode, Videocrypt};
pub use videocrypts::VideocryptS;
