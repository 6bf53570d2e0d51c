//! In-process event dispatch for the taskpulse client.
//!
//! [`Dispatcher`] is a typed publish/subscribe hub: subscribers register
//! synchronous callbacks per event kind, and async consumers can
//! additionally [`tap`](Dispatcher::tap) a `tokio::sync::broadcast`
//! stream of every published event.

pub mod dispatcher;

pub use dispatcher::{Callback, Dispatcher, Event, SubscriptionId};
