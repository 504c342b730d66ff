//! Workspace umbrella crate.
//!
//! Exposes the feature flags that map to the individual workspace crates so
//! host applications can depend on `notesync-workspace` alone. With the
//! default `desktop-shims` feature the service façade is re-exported as
//! [`service`].

#[cfg(feature = "desktop-shims")]
pub use core_service as service;
