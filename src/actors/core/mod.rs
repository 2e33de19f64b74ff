// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Health types shared by every infrastructure actor.
//
// ============================================================================

pub mod health;

// Re-export core types
pub use health::*;
