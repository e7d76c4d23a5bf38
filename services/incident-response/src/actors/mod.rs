//! Serialized actor primitive.
//!
//! Every capability that owns mutable shared state runs it behind a single
//! worker task. Callers talk to the worker only through its mailbox, each
//! request carrying a one-shot reply channel, so operations against the
//! state are linearized without any lock.
//!
//! ## Design Principles
//!
//! - **One worker per state owner**: the state is moved into the worker task
//!   and never shared
//! - **Ordered shutdown**: shutdown is a mailbox message like any other and
//!   completes only after everything queued ahead of it
//! - **No cancellation past the mailbox**: a submitted request runs to
//!   completion even if its caller gave up waiting
//!
//! ## Actor Types
//!
//! - `DeviceDirectoryActor`: in-memory device registry (see `device`)
//! - `ReadingStoreActor`: in-memory reading store (see `reading`)
//! - `NotifierActor`: logging notification sink (see `notification`)

mod framework;

pub use framework::{
    spawn, Actor, ActorContext, ActorError, ActorHandle, ActorState, Message,
};
