// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for the long-running parts of the service.
//
// Structure:
// - core/           - Health types shared by all actors (HealthStatus, HealthCheckable)
// - infrastructure/ - Concrete actors (consumer, DLQ, sweeper, health, coordinator)
//
// Note: Purchase and reconciliation logic lives in plain structs
//       (PurchaseIntentHandler, ConfirmationProcessor). Actors only own
//       lifecycles, schedules and the broker loop.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

// Re-export only what's needed in the public API
pub use self::core::HealthStatus;
pub use infrastructure::{
    CoordinatorActor, GetDlqStats, GetHandles, GetParkedConfirmations, GetSystemHealth,
    ServiceHandles, Services, Shutdown,
};
