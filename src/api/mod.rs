// ============================================================================
// HTTP API - actix-web
// ============================================================================
//
// POST /purchases              -> 201 {transaction_id, status: "PENDING"}
// GET  /health                 -> aggregate component health
// GET  /metrics                -> Prometheus text format
// GET  /reconciliation/parked  -> parked confirmations awaiting manual review
//
// ============================================================================

mod errors;
mod server;

pub use server::start_http_server;
