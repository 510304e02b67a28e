//! Notification delivery: durable record, live fan-out, and web-push
//! wakeups with endpoint retirement.

pub mod dispatcher;
pub mod web_push;

pub use dispatcher::{DispatchError, NotificationDispatcher};
pub use web_push::{PushError, PushProvider, WebPushClient};
