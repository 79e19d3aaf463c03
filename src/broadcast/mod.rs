//! Real-time fan-out to live subscribers
//!
//! [`broadcaster::Broadcaster`] owns the live subscriber set and
//! [`envelope::PushEnvelope`] defines the `init` and `update` messages pushed
//! to it. Connections themselves (WebSocket, SSE, ...) belong to the routing
//! layer, which drains a [`broadcaster::Subscription`] per connection.

pub mod broadcaster;
pub mod envelope;

pub use broadcaster::{Broadcaster, SubscriberId, Subscription, INIT_HISTORY_LEN};
pub use envelope::PushEnvelope;
