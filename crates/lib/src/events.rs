//! In-process publish/subscribe for lifecycle notifications.
//!
//! Each [`App`](crate::app::App) owns one bus. Delivery is synchronous and in
//! subscription order. Subscribers are snapshotted when `publish` starts, so a
//! subscriber added while an event is being delivered only sees later events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::util::lock;

/// Event types published by this crate.
pub mod kind {
  pub const STACK_REGISTERED: &str = "stack.registered";
  pub const BUILD_START: &str = "build.start";
  pub const BUILD_END: &str = "build.end";
  pub const ARCHIVE_PART: &str = "archive.part";
  pub const SITE_DEPLOYED: &str = "site.deployed";
}

/// What every subscriber receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
  #[serde(rename = "type")]
  pub event_type: String,
  pub properties: Value,
  #[serde(rename = "sourceID")]
  pub source_id: String,
}

pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
  event_type: String,
  id: u64,
}

impl Subscription {
  pub fn event_type(&self) -> &str {
    &self.event_type
  }
}

struct BusInner {
  source_id: String,
  suppressed: HashSet<String>,
  next_id: AtomicU64,
  subscribers: Mutex<HashMap<String, Vec<(u64, Callback)>>>,
}

/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct EventBus {
  inner: Arc<BusInner>,
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new([kind::ARCHIVE_PART])
  }
}

impl EventBus {
  /// Create a bus. Events whose type is in `suppressed` are delivered but not logged.
  pub fn new<I, S>(suppressed: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      inner: Arc::new(BusInner {
        source_id: uuid::Uuid::new_v4().to_string(),
        suppressed: suppressed.into_iter().map(Into::into).collect(),
        next_id: AtomicU64::new(0),
        subscribers: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Random identifier generated once per bus.
  pub fn source_id(&self) -> &str {
    &self.inner.source_id
  }

  pub fn subscribe<F>(&self, event_type: &str, callback: F) -> Subscription
  where
    F: Fn(&Envelope) + Send + Sync + 'static,
  {
    self.subscribe_arc(event_type, Arc::new(callback))
  }

  fn subscribe_arc(&self, event_type: &str, callback: Callback) -> Subscription {
    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    lock(&self.inner.subscribers)
      .entry(event_type.to_string())
      .or_default()
      .push((id, callback));
    Subscription {
      event_type: event_type.to_string(),
      id,
    }
  }

  /// Subscribe one callback to several event types.
  pub fn forward<F>(&self, event_types: &[&str], callback: F) -> Vec<Subscription>
  where
    F: Fn(&Envelope) + Send + Sync + 'static,
  {
    let callback: Callback = Arc::new(callback);
    event_types
      .iter()
      .map(|event_type| self.subscribe_arc(event_type, callback.clone()))
      .collect()
  }

  /// Remove a subscription. Unknown handles are ignored.
  pub fn unsubscribe(&self, subscription: &Subscription) {
    let mut subscribers = lock(&self.inner.subscribers);
    if let Some(list) = subscribers.get_mut(&subscription.event_type)
      && let Some(pos) = list.iter().position(|(id, _)| *id == subscription.id)
    {
      list.remove(pos);
    }
  }

  pub fn subscriber_count(&self, event_type: &str) -> usize {
    lock(&self.inner.subscribers).get(event_type).map_or(0, Vec::len)
  }

  /// Deliver an event to every current subscriber of `event_type`.
  pub fn publish(&self, event_type: &str, properties: Value) {
    let envelope = Envelope {
      event_type: event_type.to_string(),
      properties,
      source_id: self.inner.source_id.clone(),
    };

    if !self.inner.suppressed.contains(event_type) {
      debug!(event = %event_type, properties = %envelope.properties, "publishing event");
    }

    let snapshot: Vec<Callback> = lock(&self.inner.subscribers)
      .get(event_type)
      .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
      .unwrap_or_default();

    for callback in snapshot {
      callback(&envelope);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tracing_test::traced_test;

  fn collector() -> (Arc<Mutex<Vec<(String, Envelope)>>>, impl Fn(&str) -> Callback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let make = move |name: &str| -> Callback {
      let sink = sink.clone();
      let name = name.to_string();
      Arc::new(move |e: &Envelope| sink.lock().unwrap().push((name.clone(), e.clone())))
    };
    (seen, make)
  }

  #[test]
  fn delivers_in_subscription_order_with_shared_source_id() {
    let bus = EventBus::default();
    let (seen, make) = collector();

    let first = make("first");
    let second = make("second");
    bus.subscribe(kind::BUILD_START, move |e| first(e));
    bus.subscribe(kind::BUILD_START, move |e| second(e));

    bus.publish(kind::BUILD_START, json!({ "site": "Web" }));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "first");
    assert_eq!(seen[1].0, "second");
    assert_eq!(seen[0].1, seen[1].1);
    assert_eq!(seen[0].1.source_id, bus.source_id());
    assert_eq!(seen[0].1.properties["site"], "Web");
  }

  #[test]
  fn only_matching_type_is_delivered() {
    let bus = EventBus::default();
    let (seen, make) = collector();
    let cb = make("end");
    bus.subscribe(kind::BUILD_END, move |e| cb(e));

    bus.publish(kind::BUILD_START, Value::Null);
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn unsubscribe_removes_only_that_handle() {
    let bus = EventBus::default();
    let (seen, make) = collector();
    let a = make("a");
    let b = make("b");
    let sub_a = bus.subscribe("x", move |e| a(e));
    bus.subscribe("x", move |e| b(e));

    bus.unsubscribe(&sub_a);
    bus.unsubscribe(&sub_a);
    bus.publish("x", Value::Null);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "b");
    assert_eq!(bus.subscriber_count("x"), 1);
  }

  #[test]
  fn forward_routes_several_types_to_one_handler() {
    let bus = EventBus::default();
    let (seen, make) = collector();
    let cb = make("all");
    let subs = bus.forward(&[kind::BUILD_START, kind::BUILD_END], move |e| cb(e));
    assert_eq!(subs.len(), 2);

    bus.publish(kind::BUILD_START, Value::Null);
    bus.publish(kind::BUILD_END, Value::Null);

    let types: Vec<_> = seen.lock().unwrap().iter().map(|(_, e)| e.event_type.clone()).collect();
    assert_eq!(types, vec![kind::BUILD_START, kind::BUILD_END]);
  }

  #[test]
  fn subscriber_added_during_delivery_misses_current_event() {
    let bus = EventBus::default();
    let (seen, make) = collector();

    let inner_bus = bus.clone();
    let late = make("late");
    bus.subscribe("x", move |_| {
      let late = late.clone();
      inner_bus.subscribe("x", move |e| late(e));
    });

    bus.publish("x", json!(1));
    assert!(seen.lock().unwrap().is_empty());

    bus.publish("x", json!(2));
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn buses_have_distinct_source_ids() {
    assert_ne!(EventBus::default().source_id(), EventBus::default().source_id());
  }

  #[test]
  #[traced_test]
  fn suppressed_events_are_not_logged() {
    let bus = EventBus::new(["noisy"]);
    bus.publish("noisy", json!({ "marker": "suppressed-payload" }));
    bus.publish("loud", json!({ "marker": "visible-payload" }));

    assert!(!logs_contain("suppressed-payload"));
    assert!(logs_contain("visible-payload"));
  }
}
