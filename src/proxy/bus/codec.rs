use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::rpc::wire::WireRecord;
use crate::util::id::ActorName;

/// Frames exchanged between bus peers.
#[derive(Serialize, Deserialize, Debug)]
pub enum BusFrame {
    /// Handshake: the sending process announces the topics it hosts.
    Register { topics: Vec<ActorName> },
    /// Routed wire record for a topic hosted by the receiving process.
    Record { topic: ActorName, record: WireRecord },
}

/// Length-delimited TCP framing with bincode payloads.
pub struct BusCodec {
    codec: LengthDelimitedCodec,
}

impl BusCodec {
    pub fn new() -> Self {
        BusCodec { codec: LengthDelimitedCodec::new() }
    }
}

impl Default for BusCodec {
    fn default() -> Self {
        BusCodec::new()
    }
}

impl Encoder<BusFrame> for BusCodec {
    type Error = io::Error;

    fn encode(&mut self, item: BusFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item).map_err(io::Error::other)?;
        self.codec.encode(bytes::Bytes::from(bytes), dst)
    }
}

impl Decoder for BusCodec {
    type Item = BusFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.codec.decode(src)? {
            Some(bytes) => {
                let item = bincode::deserialize(&bytes).map_err(io::Error::other)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}
