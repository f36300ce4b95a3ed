//! # PrintLink Communication
//!
//! The printer link engine. Talks to 3D printer controller boards over serial
//! or serial-emulating TCP links, using the text G-code protocol with
//! checksummed, resendable lines or the binary packet protocol.
//! Outgoing lines pass through an ordered pipeline of rewriting stages, and
//! incoming lines are dispatched to prefix and substring callbacks.

pub mod binary;
pub mod callbacks;
pub mod connection;
pub mod pipeline;
pub mod protocol;
pub mod transport;

pub use binary::{BinaryConfig, BinaryTransport, Packet, PacketBuilder, PacketDecoder};
pub use callbacks::{CallbackId, CallbackRegistry, FoundLine, MatchRule};
pub use connection::{LineAssembler, PrinterConnection, HARDWARE_FAULTS};
pub use pipeline::{
    GcodeJob, LevelingSolution, NoLeveling, Pipeline, PipelineStage, StageCommand, StageContext,
};
pub use protocol::{AckTracker, FlowControlConfig, PendingLine, ResendArchive};
pub use transport::{
    list_ports, DefaultTransportFactory, MockTransport, MockTransportFactory, SerialPortInfo,
    SerialTransport, TcpTransport, Transport, TransportFactory,
};
