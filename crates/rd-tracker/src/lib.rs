//! Tracker core: session state, configuration, and the event dispatcher.

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod session;
pub mod workers;

pub use config::TrackerConfig;
pub use dispatcher::Dispatcher;
pub use events::RiddleBundle;
pub use events::TrackerEvent;
pub use session::Session;
pub use session::SnapshotReader;
