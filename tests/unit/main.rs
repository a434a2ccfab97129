//! Unit-level integration tests

#[path = "../support/mod.rs"]
mod support;

mod gateway_test;
mod orchestrator_test;
mod queue_test;
