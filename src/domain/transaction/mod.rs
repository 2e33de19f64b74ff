// ============================================================================
// Transaction Domain
// ============================================================================
//
// - Value objects (TransactionStatus, PaymentMethod, CorrelationRef)
// - Errors (TransitionError)
// - Aggregate (Transaction and its terminal-transition state machine)
//
// ============================================================================

pub mod value_objects;
pub mod errors;
pub mod aggregate;

pub use value_objects::*;
pub use errors::*;
pub use aggregate::*;
