//! In-process push channel: a broadcast dispatcher for row changes, plus a
//! store decorator that announces every insert on the table's topic.

pub mod dispatcher;
pub mod publish;

pub use dispatcher::Dispatcher;
pub use publish::PublishingStore;
