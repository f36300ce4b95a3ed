//! Binary packet protocol (s3g/x3g)
//!
//! Machines speaking the binary protocol are driven through the same text
//! interface as every other printer: [`BinaryTransport`] translates outgoing
//! lines into packets and synthesizes text acknowledgments from the replies.

pub mod packet;
pub mod transport;
pub mod translator;

pub use packet::{crc8, Packet, PacketBuilder, PacketDecoder};
pub use translator::{BinaryConfig, Request, Response, Translator};
pub use transport::BinaryTransport;
