pub mod guide;
pub mod playlist;

pub use guide::{Guide, Programme};
pub use playlist::{Channel, UNCATEGORIZED_GROUP, UNKNOWN_TITLE};
