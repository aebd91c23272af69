//! core
//!
//! Core domain types and the access control model.
//!
//! # Modules
//!
//! - [`types`] - Strong types: RepoName, Username, GroupName, KeyLabel, Oid
//! - [`permission`] - Ordered permission level vocabulary
//! - [`model`] - The access control model and its operations
//! - [`config`] - Configuration schema and loading
//! - [`lock`] - Exclusive lock on the local mirror
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid names from reaching the model
//! - Model operations validate fully before mutating
//! - Nothing in `core` touches git or the network

pub mod config;
pub mod lock;
pub mod model;
pub mod permission;
pub mod types;
