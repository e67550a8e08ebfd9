//! Client-side board engine: cached reads, optimistic mutations, the
//! realtime subscription and drag-and-drop resolution.

pub mod api;
pub mod cache;
pub mod drag;
pub mod optimistic;
pub mod session;
pub mod subscriber;

pub use api::{ApiError, AttachmentUpload, BoardApi, HttpBoardApi, MoveCardRequest};
pub use cache::TtlCache;
pub use drag::{DragController, DragOutcome, DropTarget};
pub use optimistic::{BoardSync, Cached, MutationError};
pub use session::BoardSession;
pub use subscriber::{BoardSubscriber, RemoteChange, SubscriberConfig, SubscriberError, SyncEvent};
