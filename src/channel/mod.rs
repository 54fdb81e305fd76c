//! The session channel: a persistent duplex connection bound to the
//! authenticated identity.

mod bridge;

pub use bridge::{ChannelBridge, ChannelFrame};

/// Global presence topic consumed by the staff dashboard
pub const PRESENCE_TOPIC: &str = "/topic/presence";

/// Per-user notification queue topic
pub fn user_queue_topic(user_id: &str) -> String {
    format!("/user/{}/queue/notifications", user_id)
}
