//! Error Types
//!
//! This module defines the error types used throughout the engine.
//!
//! # Overview
//!
//! The main error type [`EngineError`] covers all failure modes including:
//! - Construction-time configuration errors
//! - Tree registry handle errors
//! - Container parsing and chunk decode errors
//! - Sort worker buffer and lifecycle errors
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, EngineError>`.
//!
//! Per-frame operations never bubble an error out of the frame loop: a
//! failed traversal keeps the last-known-good indices, a failed sort keeps
//! the prior ordering, and a failed chunk fetch is dropped and re-requested
//! by a later traversal. Only construction and disposal surface errors to
//! the caller.

use thiserror::Error;

/// The main error type for the Veil engine.
#[derive(Error, Debug)]
pub enum EngineError {
    // ========================================================================
    // Configuration & Lifecycle Errors
    // ========================================================================
    /// Invalid engine configuration detected at construction time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A call was made on an engine or worker that has been disposed.
    #[error("Engine component disposed: {0}")]
    Disposed(&'static str),

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// A referenced tree handle does not exist or has been disposed.
    #[error("Unknown LoD tree handle")]
    UnknownTree,

    /// A range update addressed chunks past the tree's capacity.
    #[error("Tree update out of range: {context} (chunk {chunk}, count {count})")]
    OutOfRange {
        /// Description of what was being updated
        context: &'static str,
        /// First chunk of the offending range
        chunk: u32,
        /// Number of chunks in the range
        count: u32,
    },

    // ========================================================================
    // Traversal Errors
    // ========================================================================
    /// An instance transform contained non-finite values.
    #[error("Degenerate projection: non-finite view transform")]
    DegenerateProjection,

    // ========================================================================
    // Sort Worker Errors
    // ========================================================================
    /// The ordering output buffer is too small for the requested sort.
    #[error("Invalid sort buffer: need {needed} slots, have {capacity}")]
    InvalidBuffer {
        /// Required slot count (active splats)
        needed: usize,
        /// Capacity of the provided output buffer
        capacity: usize,
    },

    // ========================================================================
    // Cache & Streaming Errors
    // ========================================================================
    /// More distinct paged objects than the page pool admits.
    #[error("Page cache over capacity: {objects} paged objects for {pages} pages")]
    OverCapacity {
        /// Number of registered paged objects
        objects: usize,
        /// Total page count in the pool
        pages: usize,
    },

    /// A chunk failed to fetch or decode. The chunk is dropped and will be
    /// re-requested by a later traversal.
    #[error("Chunk decode failed for chunk {chunk}: {reason}")]
    ChunkDecodeFailed {
        /// The chunk id within its container
        chunk: u32,
        /// Why the decode failed
        reason: String,
    },

    // ========================================================================
    // Container Format Errors
    // ========================================================================
    /// The container header or a chunk record is malformed.
    #[error("Container format error: {0}")]
    Format(String),

    /// File I/O error from a local chunk source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error from a remote chunk source.
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;
