//! REST API surface: admin endpoints and the ticket-platform webhook.

pub mod routes;
pub mod schemas;
pub mod state;

pub use routes::create_api_router;
pub use state::{AppState, GenerationGuard, GuardRejection};
