//! .ics reading and writing (RFC 5545).

mod generate;
mod parse;

pub use generate::generate_object;
pub use parse::{parse_object, parse_resource};
