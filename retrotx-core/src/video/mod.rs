//! Video rasterisation: configuration presets, the line renderer and
//! the per-line processor stack.

pub mod engine;
pub mod line;
pub mod presets;
pub mod process;

pub use engine::{EngineState, VideoEngine, Yiq16};
pub use line::{Line, LineRing};
pub use process::LineProcessor;
