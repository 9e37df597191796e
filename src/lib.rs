//! Deferred batch upload, gallery reconciliation and optimistic reordering
//! for a client that edits ordered media galleries against a REST backend.
//!
//! - [`registry`]: pending uploads and their preview handles
//! - [`upload`]: concurrent batch uploads with per-item failures
//! - [`gallery`]: merging uploads into one ordered gallery
//! - [`ordered_list`]: optimistic reordering with rollback
//! - [`editor`]: the save transaction of one entity form
//! - [`backend`]: the remote collaborators and their HTTP client

pub mod backend;
pub mod config;
pub mod container;
pub mod editor;
pub mod error;
pub mod gallery;
pub mod model;
pub mod ordered_list;
pub mod registry;
pub mod upload;
