//! Protocol decoding core
//!
//! Turns raw GPIO levels into button words and button words into
//! transitions:
//!
//! 1. [`sampler`] - one bit from one line, failing closed
//! 2. [`sync_reader`] - master-clocked LATCH/CLOCK/DATA frames
//! 3. [`async_reader`] - start-edge triggered, self-clocked frames
//! 4. [`differ`] - previous/current comparison and sink reporting
//!
//! # Architecture
//!
//! ```text
//! SyncShiftReader ──┐
//!                   ├──► ButtonWord ──► StateDiffer ──► InputSink
//! AsyncFrameReader ─┘
//! ```
//!
//! Nothing in here spawns threads or touches global state; the
//! [`crate::acquisition`] layer decides which context runs what.

pub mod async_reader;
pub mod button;
pub mod differ;
pub mod sampler;
pub mod sync_reader;
pub mod word;

pub use async_reader::{
    AbandonReason, AnomalyPolicy, AsyncFrameReader, EdgeOutcome, FrameOutcome, FramePhase,
    SerialFrame, SerialFrameConfig,
};
pub use button::{ButtonId, ButtonMap, ButtonMapError, ButtonMapping};
pub use differ::{diff, PublishReport, StateDiffer, TransitionEvent};
pub use sampler::{BitSampler, Polarity, Sample};
pub use sync_reader::{ShiftFrame, ShiftLines, SyncShiftReader};
pub use word::{BitOrder, ButtonWord};
