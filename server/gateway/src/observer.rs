//! Binding discipline for the optional WebSocket observer surface.
//!
//! The transport itself (accepting WebSocket connections and framing JSON
//! over them) is out of scope here; what belongs to the gateway's
//! concurrency model is the *binding*: a subscriber is looked up by client
//! IP at publish time, never held as an owning reference to a
//! [`crate::registry::LogicalClient`]. This keeps reap simple — dropping a
//! client's registry entry is enough, regardless of whether an observer is
//! attached.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObserverEvent {
    Connected,
    Migrated,
    Utterance { transcript: String },
    ReplyText { text: String },
    Reset,
    Reaped,
}

#[derive(Serialize)]
struct ObserverFrame<'a> {
    client_ip: String,
    #[serde(flatten)]
    event: &'a ObserverEvent,
}

/// IP-keyed table of observer channels. A lookup happens at publish time;
/// nothing here outlives the subscriber's own unbound sender.
#[derive(Default)]
pub struct ObserverHub {
    subscribers: RwLock<HashMap<IpAddr, UnboundedSender<String>>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, ip: IpAddr, tx: UnboundedSender<String>) {
        self.subscribers.write().unwrap().insert(ip, tx);
    }

    pub fn unbind(&self, ip: IpAddr) {
        self.subscribers.write().unwrap().remove(&ip);
    }

    /// Publish an event to `ip`'s observer, if one is bound. Silently drops
    /// the event if nobody is listening or the channel is closed.
    pub fn publish(&self, ip: IpAddr, event: ObserverEvent) {
        let subscribers = self.subscribers.read().unwrap();
        if let Some(tx) = subscribers.get(&ip) {
            let frame = ObserverFrame { client_ip: ip.to_string(), event: &event };
            if let Ok(json) = serde_json::to_string(&frame) {
                let _ = tx.send(json);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn publish_without_a_subscriber_is_a_noop() {
        let hub = ObserverHub::new();
        hub.publish(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), ObserverEvent::Connected);
    }

    #[test]
    fn bound_subscriber_receives_the_frame() {
        let hub = ObserverHub::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.bind(ip, tx);

        hub.publish(ip, ObserverEvent::ReplyText { text: "hi there".into() });

        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("\"event\":\"reply_text\""));
        assert!(frame.contains("10.0.0.5"));
    }

    #[test]
    fn unbind_stops_further_delivery() {
        let hub = ObserverHub::new();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.bind(ip, tx);
        hub.unbind(ip);

        hub.publish(ip, ObserverEvent::Reaped);
        assert!(rx.try_recv().is_err());
    }
}
