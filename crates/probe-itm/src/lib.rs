//! ITM/DWT packet decoding, message decoding, and timestamp-ordered
//! re-sequencing.

pub mod message;
pub mod packet;
pub mod resequencer;

pub use message::{ExceptionFunction, Message, MessageDecoder, TsStatus};
pub use packet::{ItmError, ItmEvent, ItmPacket, ItmPacketDecoder, ItmStats};
pub use resequencer::Resequencer;
