pub mod containers;
pub mod demux;
pub mod event;
pub mod query;
pub mod session;

pub use event::StreamFrame;
pub use query::StreamQuery;
pub use session::LogSession;
