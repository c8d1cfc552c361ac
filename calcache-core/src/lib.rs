//! Local replica of remote CalDAV calendars.
//!
//! - [`sync`] keeps a SQLite cache ([`store`]) in step with a collection
//!   through incremental sync tokens, one transaction per cycle
//! - [`recurrence`] expands recurring events into concrete occurrences
//! - [`timeline`] turns occurrences into contiguous segments of activity
//! - [`bulk`] saves and deletes events through the bounded [`dispatch`] pool
//!
//! The server is reached only through the [`remote::RemoteCalendar`] trait.

pub mod bulk;
pub mod datetime;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod ics;
pub mod recurrence;
pub mod remote;
pub mod settings;
pub mod store;
pub mod sync;
pub mod timeline;

pub use datetime::{Datetime, Zone};
pub use error::{CalError, CalResult};
pub use event::{Event, EventObject, RawProperty, Recurrence, Trigger, TriggerRelation};
pub use recurrence::Window;
pub use settings::Settings;
pub use timeline::TimeSegment;
