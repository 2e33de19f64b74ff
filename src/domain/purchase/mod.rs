// ============================================================================
// Purchase Domain
// ============================================================================
//
// - Commands (PurchaseRequest, PurchaseReceipt)
// - Errors (PurchaseError)
// - Handler (PurchaseIntentHandler: validate, reserve, record, initiate)
//
// ============================================================================

pub mod commands;
pub mod errors;
pub mod handler;

pub use commands::*;
pub use errors::*;
pub use handler::*;
