//! Core types and storage for records question answering (rqa).
//!
//! Provides the record model ([`document::Document`], [`document::Entity`]), the
//! plan wire format ([`plan::Plan`]), the filter language ([`filter::Filter`]),
//! the schema alias map, the [`store::DocumentStore`] seam with an in-memory
//! implementation, conversation sessions, JSON snapshot persistence, and
//! configuration.

pub mod config;
pub mod document;
pub mod filter;
pub mod plan;
pub mod schema;
pub mod session;
pub mod storage;
pub mod store;
