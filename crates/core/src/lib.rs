pub mod change;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod item;
pub mod schedule;

pub use change::*;
pub use config::Config;
pub use dead_letter::*;
pub use error::*;
pub use item::*;
pub use schedule::{ScheduleEntry, SourcesFile};
