//! Error types for allocator construction
//!
//! Only construction-time validation is fallible. Runtime precondition
//! violations (out-of-range indices, freeing unallocated blocks, operating
//! on a shut-down allocator) indicate caller bugs and abort via panic.

use thiserror::Error;

/// Allocator construction errors
#[derive(Error, Debug)]
pub enum BlockMapError {
    /// Declared capacity must be a positive block count
    #[error("Invalid capacity: {0} blocks")]
    InvalidCapacity(i64),

    /// Zone size must be a power of two no smaller than one bitmap word
    #[error("Invalid zone size: {0} blocks")]
    InvalidZoneSize(i64),

    /// Span size (internal fanout) must be a power of two of at least 2
    #[error("Invalid span size: {0}")]
    InvalidSpanSize(i64),
}

/// Allocator construction result type
pub type Result<T> = std::result::Result<T, BlockMapError>;
