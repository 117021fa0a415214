//! Shared test utilities for slidekit integration tests.
//!
//! This module provides:
//! - `TestService` for running a full service inside a temp directory
//! - Builders for `.pptx` decks and rendered SVG slides
//! - Fake render strategies, extractors and bridges with call counters

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::TestService;
