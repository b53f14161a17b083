//! Wire-level codecs for the trace link: COBS framing, OFLOW packaging, and
//! TPIU formatter demultiplexing.

pub mod cobs;
pub mod oflow;
pub mod tpiu;

pub use cobs::{CobsDecoder, CobsError, CobsEvent};
pub use oflow::{OflowDecoder, OflowError, OflowFrame, OflowStats};
pub use tpiu::{StreamByte, TpiuDecoder, TpiuError, TpiuStats};
