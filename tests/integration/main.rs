//! Integration tests for Favorites-Keeper
//!
//! These tests use wiremock to stand in for the remote favorites API and
//! drive whole runs through the public crate surface.

mod common;
mod control_tests;
mod ingest_tests;
