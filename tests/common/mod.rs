//! Common test utilities and fixtures for the settings-sync test suite.
//!
//! Shared secrets, DSNs and store doubles used by the encryption, sync,
//! secure settings and property-based suites.

#![allow(dead_code)]

pub mod fixtures;
