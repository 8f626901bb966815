#![doc = include_str!("../README.md")]

mod broker;
mod clock;
mod config;
mod coordinator;
mod error;
mod event;
mod event_source;
mod event_store;
mod identifier;
mod liveness;
mod lock;
mod observer;
pub mod projection;
mod source_mapping;
mod subscriber;
mod subscription_state;
pub mod testing;

#[doc(inline)]
pub use crate::broker::EventBroker;
#[doc(inline)]
pub use crate::clock::{Clock, FixedClock, SystemClock};
#[doc(inline)]
pub use crate::config::BrokerConfig;
#[doc(inline)]
pub use crate::coordinator::{CoordinatorConfig, SubscriptionCoordinator, COORDINATOR_LOCK};
#[doc(inline)]
pub use crate::error::{Error, Result};
#[doc(inline)]
pub use crate::event::{NewEvent, StoredEvent};
#[doc(inline)]
pub use crate::event_source::{EventSourceFactory, EventSourceView, StoreEventSourceFactory};
#[doc(inline)]
pub use crate::event_store::{
    EventStore, InMemoryEventStore, QueryConstraint, WriteCondition, DEFAULT_SCAN_PAGE_SIZE,
};
#[doc(inline)]
pub use crate::identifier::Identifier;
#[doc(inline)]
pub use crate::liveness::{InMemoryLivenessStore, SubscriberLivenessStore, SubscriberState};
#[doc(inline)]
pub use crate::lock::{InMemoryLockManager, LockGuard, LockHandle, LockManager};
#[doc(inline)]
pub use crate::observer::SubscriptionObserver;
#[doc(inline)]
pub use crate::source_mapping::SourceMappingRegistry;
#[doc(inline)]
pub use crate::subscriber::{Subscriber, SubscriberKey, SubscriberRegistry};
#[doc(inline)]
pub use crate::subscription_state::{
    InMemorySubscriptionStateStore, SubscriptionState, SubscriptionStateChange,
    SubscriptionStateStore,
};

pub type BoxDynError = Box<dyn std::error::Error + 'static + Send + Sync>;
