//! Functional tests over the HTTP surface

#[path = "../support/mod.rs"]
mod support;

mod api_test;
