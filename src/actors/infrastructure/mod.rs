// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// - Confirmation consumer (broker subscription, manual commit)
// - Dead letter queue (parked confirmations)
// - Pending sweeper (expiry of unconfirmed transactions)
// - Health monitoring
// - Coordination and shutdown
//
// ============================================================================

// Private module declarations
mod confirmation_consumer;
mod coordinator;
mod dlq;
mod health_monitor;
mod pending_sweeper;

// Re-export for public API
pub use coordinator::{CoordinatorActor, GetHandles, ServiceHandles, Services, Shutdown};
pub use dlq::{DlqActor, GetDlqStats, GetParkedConfirmations};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor};
pub use pending_sweeper::{PendingSweeper, SweepNow};
