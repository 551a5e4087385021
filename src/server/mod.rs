//! Application assembly: shared state, wiring and the router.

pub mod init;
pub mod state;

pub use init::create_app;
pub use state::AppState;
