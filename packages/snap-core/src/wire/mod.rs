//! Bit-exact wire framing: the fixed header, length-prefixed primitives, and
//! the tagged-union message kinds.

pub mod codec;
pub mod header;
pub mod messages;
pub mod time;

pub use codec::{read_map, read_string, write_map, write_string};
pub use header::MessageHeader;
pub use messages::{Message, MessageType};
pub use time::WallClock;
