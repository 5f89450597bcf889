//! Core interfaces (traits) shared across the codebase.
//!
//! Thin re-export layer so `crate::traits::*` stays stable for call sites
//! while the individual areas evolve independently.

mod calendar;
mod provider;
mod store;

pub use calendar::{CalendarKind, CalendarSink};
pub use provider::{ModelProvider, ProviderResponse, TokenUsage};
pub use store::{AppointmentStore, FeedbackStore, InsertOutcome, MessageStore, StateStore};

/// Import this in modules that call store-trait methods on `dyn StateStore`.
///
/// `StateStore` is a facade (supertrait) used for trait objects, but Rust
/// still requires the defining trait to be in scope for method-call syntax.
pub mod store_prelude {
    #![allow(unused_imports)]
    pub use super::{AppointmentStore, FeedbackStore, MessageStore, StateStore};
}
