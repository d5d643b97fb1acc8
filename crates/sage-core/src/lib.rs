//! # sage-core
//!
//! Foundation types, errors, and utilities for the Sage coach backend.
//!
//! This crate provides the shared vocabulary that all other Sage crates
//! depend on:
//!
//! - **Messages**: [`messages::ChatMessage`] with user/assistant roles
//! - **Conversations**: [`conversation::Conversation`] tree with branch
//!   back-references
//! - **Users**: [`user::UserRecord`] with credit and subscription fields
//! - **Graph**: [`graph::GraphSnapshot`] versioned by [`graph::GraphHistory`],
//!   mutated through [`graph::GraphModification`] batches
//! - **Text**: word-count helpers for context budgeting
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other sage crates.

#![deny(unsafe_code)]

pub mod constants;
pub mod conversation;
pub mod graph;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod text;
pub mod user;
