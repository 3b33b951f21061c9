//! Test Helper Utilities
//!
//! Shared utilities for nncrawl integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod stub_evaluator;

pub use db_utils::{backdate_claim, create_test_db, seed_job, test_repository};
pub use stub_evaluator::StubEvaluator;
