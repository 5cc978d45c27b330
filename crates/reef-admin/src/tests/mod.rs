//! Tests for the reef-admin crate.

mod helpers;
