//! Audio processing: filter chains, engine adapter and measurements

pub mod denoise;
pub mod diagnostics;
pub mod engine;
pub mod filter_chain;
pub mod loudness;
pub mod quality;
pub mod units;

pub use denoise::{DenoiseError, DenoiseResolution, DenoiseResolver};
pub use diagnostics::{DiagnosticsError, DiagnosticsParser, FfmpegTextParser, FrameStatistics};
pub use engine::{Engine, EngineError, Invocation, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use filter_chain::{ApplyPass, DenoiseStage, FilterChain, FilterStage, StageKind};
pub use units::{db_to_linear, format_number};
