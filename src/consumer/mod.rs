// Event filter/mapper: turns raw queue messages into notifications.

pub mod event;
pub mod handler;
pub mod mapper;

pub use event::{PublicationEvent, SkipReason, TransactionFilter};
pub use handler::{Disposition, HandleError, QueueHandler};
pub use mapper::{MapError, NotificationMapper};
