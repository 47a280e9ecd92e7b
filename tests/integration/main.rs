//! Integration tests for the harvester
//!
//! - `traversal_tests`: the engine against a scripted in-process portal
//! - `portal_tests`: a full harvest against a wiremock portal

mod portal_tests;
mod traversal_tests;
