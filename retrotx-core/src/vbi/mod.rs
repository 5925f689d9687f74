//! Vertical-blanking-interval services and other per-line insertions.

pub mod acp;
pub mod cc608;
pub mod data;
pub mod sis;
pub mod teletext;
pub mod vitc;
pub mod vits;
pub mod wss;

pub use acp::Acp;
pub use cc608::Cc608;
pub use data::{BitOrder, VbiLut};
pub use sis::Sis;
pub use teletext::Teletext;
pub use vitc::Vitc;
pub use vits::Vits;
pub use wss::Wss;
