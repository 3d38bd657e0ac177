//! Streaming Storage and Synthetic Data
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      StreamBuffer                         │
//! │   oldest ◄──────────── window (≤ capacity) ────────► newest│
//! │   [s0][s1][s2] ...                            [sN]        │
//! │     ▲ evicted first on overflow        add_batch ▲        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`StreamBuffer`]: bounded drop-oldest window with eviction accounting,
//!   throttled de-duplication and a memory-pressure hook
//! - [`SyntheticGenerator`]: scenario-driven sample source for tests,
//!   demos and offline mode

mod buffer;
mod synthetic;

pub use buffer::{BufferConfig, BufferMetrics, MemoryPressure, StreamBuffer};
pub use synthetic::{Scenario, SyntheticConfig, SyntheticGenerator, UnknownScenario};
