//! warden-chaos — fault injection for resilience testing.
//!
//! Two independent timers, one for fleet worker processes and one for the
//! dependency containers named in config. When a timer is due the injector
//! rolls against the configured probability and, on a hit, kills one
//! uniformly chosen target. The injector never restarts anything: the next
//! control loop tick reaps the dead handle and the scaling engine repairs
//! the fleet.
//!
//! Every attempt is recorded as a `ChaosEvent` in the state store.

pub mod injector;
pub mod settings;

pub use injector::{ChaosInjector, choose_target};
pub use settings::ChaosSettings;
