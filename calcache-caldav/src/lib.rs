//! CalDAV implementation of [`calcache_core::remote::RemoteCalendar`].

mod client;
mod xml;

pub use client::CalDavClient;
