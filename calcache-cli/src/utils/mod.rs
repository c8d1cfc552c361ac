pub mod time;
pub mod tui;
