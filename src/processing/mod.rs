//! Wire decoding, per-sample tracking and frame simulation

pub mod parser;
pub mod simulator;
pub mod tracker;

pub use parser::{DecodedFrame, FrameParser, FramePayload, ParseError, WireId};
pub use simulator::{MotionPhase, RegattaSimulator, SimulatedFrame};
pub use tracker::{LineTracker, TrackerUpdate};
