//! Lexica Index crate - external vector store client and reconciler.
//!
//! Defines the upsert-by-id contract the pipeline consumes, an HTTP
//! implementation and an in-memory mock, and the reconciler that moves
//! queued documents into the store and records the outcomes.

pub mod client;
pub mod reconciler;

pub use client::{HttpVectorStore, MockVectorStore, UpsertItem, VectorStore};
pub use reconciler::{sanitize_metadata, IndexErrorDetail, IndexReconciler, IndexReport};
