//! Network bindings that relay cache views to subscribers.
//!
//! A [`Publisher`] owns one `{port, path, key}` binding and a
//! [`ConnectionPool`](crate::ConnectionPool). Subscribers are admitted over
//! transports produced by an external [`Acceptor`](crate::Acceptor); the
//! publisher only sees established connections.

mod binding;
mod server;

pub use binding::BindingRegistry;
pub use server::{ConnectionHook, MessageHook, Publisher};
