//! Realtime delivery: wire events, the websocket gateway, the local
//! connection registry and the cross-process event bus.

pub mod bus;
pub mod events;
pub mod gateway;
pub mod session;

pub use bus::{BusEvent, EventBus, Scope};
pub use events::{ClientEvent, ServerEvent};
pub use session::SessionRegistry;
