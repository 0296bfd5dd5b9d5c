//! Tempo and key collaborators.
//!
//! The orchestrator only depends on the [`RhythmExtractor`] and
//! [`KeyExtractor`] traits; the implementations here are the defaults a
//! runtime hands out when nothing else is injected.

pub mod key;
pub mod rhythm;

pub use key::{resolve_key_note, ChromaKeyExtractor, Key, KeyEstimate, KeyExtractor, Scale};
pub use rhythm::{RhythmEstimate, RhythmExtractor, SpectralFluxRhythm};
