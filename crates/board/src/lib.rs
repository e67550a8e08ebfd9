pub mod model;
pub mod ordering;
pub mod protocol;

pub use model::{Attachment, Board, Card, ChangeKind, Label, List, ListPosition};
pub use ordering::{CardPlacement, OrderingError};
