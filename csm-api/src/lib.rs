//! csm-api - upload audio, run an external transcription command, return its JSON.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod error;
pub mod routes;
pub mod runner;
pub mod scratch;

pub use error::ApiError;
pub use routes::{build_router, AppState};
pub use runner::{InferenceError, InferenceRunner, ParseStrategy};
pub use scratch::ScratchDir;
