// ============================================================================
// Domain Layer
// ============================================================================
//
// transaction - lifecycle record and its state machine
// purchase    - synchronous purchase intent (reserve, record, initiate)
//
// Storage and broker plumbing live outside this layer and are reached
// through the traits in `crate::store` and `crate::gateway`.
//
// ============================================================================

pub mod transaction;
pub mod purchase;
