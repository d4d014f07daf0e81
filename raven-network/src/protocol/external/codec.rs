//! A Tokio codec mapping byte streams to Raven message streams.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use raven_chain::{
    parameters::Network,
    serialization::{sha256d, RavenDeserialize, RavenSerialize, SerializationError as Error},
    transaction::Transaction,
};

use crate::constants;
use crate::meta_addr::MetaAddr;
use crate::timing::Deadline;

use super::command::Command;
use super::inv::InventoryHash;
use super::message::{
    AssetData, GetAssetData, GetBlocks, GetHeaders, HeadersBatch, Message, MerkleBlock,
    RejectReason, Version,
};
use super::types::*;

/// The length of a Raven message header.
const HEADER_LEN: usize = constants::HEADER_LEN;

/// A codec which produces Raven messages from byte streams and vice versa.
pub struct Codec {
    builder: Builder,
    state: DecodeState,
}

/// A builder for specifying [`Codec`] options.
pub struct Builder {
    /// The network magic to use in encoding.
    network: Network,
    /// The protocol version to speak when encoding/decoding.
    version: ProtocolVersion,
    /// The maximum allowable message length.
    max_len: usize,
    /// An optional deadline armed while a message body is in flight, so the
    /// receive loop can enforce the per-message timeout.
    body_deadline: Option<(Arc<Deadline>, Duration)>,
}

impl Codec {
    /// Return a builder for constructing a [`Codec`].
    pub fn builder() -> Builder {
        Builder {
            network: Network::Mainnet,
            version: constants::CURRENT_VERSION,
            max_len: constants::MAX_PROTOCOL_MESSAGE_LEN,
            body_deadline: None,
        }
    }
}

impl Builder {
    /// Finalize the builder and return a [`Codec`].
    pub fn finish(self) -> Codec {
        Codec {
            builder: self,
            state: DecodeState::Head,
        }
    }

    /// Configure the codec for the given [`Network`].
    pub fn for_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Configure the codec for the given protocol version.
    #[allow(dead_code)]
    pub fn for_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Configure the codec's maximum accepted payload size, in bytes.
    #[allow(dead_code)]
    pub fn with_max_body_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    /// Arm `deadline` for `timeout` whenever a message body is pending, and
    /// refresh it while body bytes arrive.
    pub(crate) fn with_body_deadline(mut self, deadline: Arc<Deadline>, timeout: Duration) -> Self {
        self.body_deadline = Some((deadline, timeout));
        self
    }
}

// ======== Encoding =========

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        use Error::Parse;

        let command = match item.command() {
            Some(command) => command,
            None => return Err(Parse("unknown messages cannot be encoded")),
        };

        let mut body = Vec::new();
        self.write_body(&item, &mut body)?;

        if body.len() > self.builder.max_len {
            return Err(Parse("body length exceeded maximum size"));
        }

        trace!(command = %command, len = body.len(), "encoding message");

        let mut header = [0u8; HEADER_LEN];
        let mut header_writer = Cursor::new(&mut header[..]);
        header_writer.write_all(&Magic::from(self.builder.network).0[..])?;
        header_writer.write_all(command.bytes())?;
        header_writer.write_u32::<LittleEndian>(body.len() as u32)?;
        header_writer.write_all(&sha256d::Checksum::from(&body[..]).0)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Codec {
    /// Write the body of the message into the given writer. This allows
    /// writing the message body prior to writing the header, so that the
    /// header can contain a checksum of the message body.
    fn write_body<W: Write>(&self, msg: &Message, mut writer: W) -> Result<(), Error> {
        match msg {
            Message::Version(inner) => inner.raven_serialize(&mut writer)?,
            Message::Verack => { /* Empty payload -- no-op */ }
            Message::Ping(nonce) => nonce.raven_serialize(&mut writer)?,
            Message::Pong(nonce) => nonce.raven_serialize(&mut writer)?,
            Message::Reject {
                message,
                ccode,
                reason,
                data,
            } => {
                message.raven_serialize(&mut writer)?;
                writer.write_u8(*ccode as u8)?;
                reason.raven_serialize(&mut writer)?;
                if let Some(data) = data {
                    writer.write_all(&data[..])?;
                }
            }
            Message::Addr(addrs) => addrs.raven_serialize(&mut writer)?,
            Message::GetAddr => { /* Empty payload -- no-op */ }
            Message::GetBlocks(get_blocks) => {
                self.builder.version.raven_serialize(&mut writer)?;
                get_blocks.raven_serialize(&mut writer)?
            }
            Message::GetHeaders(get_headers) => {
                self.builder.version.raven_serialize(&mut writer)?;
                get_headers.raven_serialize(&mut writer)?
            }
            Message::Headers(batch) => writer.write_all(&batch.to_payload())?,
            Message::Inv(hashes) => hashes.raven_serialize(&mut writer)?,
            Message::GetData(hashes) => hashes.raven_serialize(&mut writer)?,
            Message::NotFound(hashes) => hashes.raven_serialize(&mut writer)?,
            Message::Tx(transaction) => transaction.raven_serialize(&mut writer)?,
            Message::Mempool => { /* Empty payload -- no-op */ }
            // The wallet layer hands us a fully serialized filter.
            Message::FilterLoad(filter) => writer.write_all(filter)?,
            Message::MerkleBlock(inner) => inner.raven_serialize(&mut writer)?,
            Message::FeeFilter(rate) => rate.raven_serialize(&mut writer)?,
            Message::GetAssetData(inner) => inner.raven_serialize(&mut writer)?,
            Message::AssetData(_) => {
                // Only full nodes answer asset queries.
                return Err(Error::Parse("assetdata replies cannot be encoded"));
            }
            Message::Unknown { .. } => unreachable!("rejected above"),
        }
        Ok(())
    }
}

// ======== Decoding =========

enum DecodeState {
    Head,
    Body {
        body_len: usize,
        command: Option<Command>,
        raw_command: [u8; 12],
        checksum: sha256d::Checksum,
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeState::Head => write!(f, "DecodeState::Head"),
            DecodeState::Body {
                body_len,
                command,
                checksum,
                ..
            } => f
                .debug_struct("DecodeState::Body")
                .field("body_len", &body_len)
                .field("command", &command)
                .field("checksum", &checksum)
                .finish(),
        }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        use Error::Parse;
        match self.state {
            DecodeState::Head => {
                // Resynchronize: slide byte-by-byte until the network magic
                // appears, discarding whatever garbage precedes it.
                let magic = Magic::from(self.builder.network).0;
                match src.windows(4).position(|window| window == magic) {
                    Some(0) => {}
                    Some(skipped) => {
                        debug!(skipped, "discarded bytes before message start");
                        src.advance(skipped);
                    }
                    None => {
                        // No magic yet; keep only a potential prefix of one.
                        if src.len() > 3 {
                            let keep = src.len() - 3;
                            debug!(skipped = keep, "discarded bytes before message start");
                            src.advance(keep);
                        }
                        return Ok(None);
                    }
                }

                if src.len() < HEADER_LEN {
                    trace!(?self.state, "src buffer does not have an entire header, waiting");
                    // Signal that decoding requires more data.
                    return Ok(None);
                }

                // Now that we know that src contains a header, split off the header section.
                let header = src.split_to(HEADER_LEN);

                // Create a cursor over the header and parse its fields.
                let mut header_reader = Cursor::new(&header);
                let _magic = <[u8; 4]>::raven_deserialize(&mut header_reader)?;
                let raw_command = <[u8; 12]>::raven_deserialize(&mut header_reader)?;
                let body_len = header_reader.read_u32::<LittleEndian>()? as usize;
                let checksum =
                    sha256d::Checksum(<[u8; 4]>::raven_deserialize(&mut header_reader)?);

                if raw_command[11] != 0 {
                    return Err(Parse("message command is not NUL terminated"));
                }
                if body_len > self.builder.max_len {
                    return Err(Parse("body length exceeded maximum size"));
                }

                let command = Command::from_bytes(&raw_command);
                trace!(
                    ?command,
                    body_len,
                    ?checksum,
                    "read header from src buffer"
                );

                // The body is now pending: start the per-message clock.
                if let Some((deadline, timeout)) = &self.builder.body_deadline {
                    deadline.arm_in(*timeout);
                }

                // Reserve buffer space for the expected body and the following header.
                src.reserve(body_len + HEADER_LEN);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    raw_command,
                    checksum,
                };

                // Now that the state is updated, recurse to attempt body decoding.
                self.decode(src)
            }
            DecodeState::Body {
                body_len,
                command,
                raw_command,
                checksum,
            } => {
                if src.len() < body_len {
                    // Need to wait for the full body; every visit here means
                    // bytes arrived, so push the deadline out.
                    if let Some((deadline, timeout)) = &self.builder.body_deadline {
                        deadline.arm_in(*timeout);
                    }
                    trace!(?self.state, len = src.len(), "src buffer does not have an entire body, waiting");
                    return Ok(None);
                }

                // Now that we know we have the full body, split off the body,
                // and reset the decoder state for the next message. Otherwise
                // we will attempt to read the next header as the current body.
                let body = src.split_to(body_len);
                self.state = DecodeState::Head;
                if let Some((deadline, _)) = &self.builder.body_deadline {
                    deadline.clear();
                }

                if checksum != sha256d::Checksum::from(&body[..]) {
                    return Err(Parse(
                        "supplied message checksum does not match computed checksum",
                    ));
                }

                let command = match command {
                    Some(command) => command,
                    None => return Ok(Some(Message::Unknown {
                        command: raw_command,
                    })),
                };

                let mut body_reader = Cursor::new(&body);
                // Convention: deserialize the message directly (using
                // `raven_deserialize()`) unless it requires context from the
                // codec. In that case, use the codec's self.read_* method.
                let msg = match command {
                    Command::Addr => {
                        Message::Addr(Vec::<MetaAddr>::raven_deserialize(&mut body_reader)?)
                    }
                    Command::Version => {
                        Message::Version(Version::raven_deserialize(&mut body_reader)?)
                    }
                    Command::Verack => Message::Verack,
                    Command::GetAddr => Message::GetAddr,
                    Command::GetBlocks => self.read_getblocks(&mut body_reader)?,
                    Command::GetHeaders => self.read_getheaders(&mut body_reader)?,
                    Command::Headers => Message::Headers(HeadersBatch::parse(
                        &body,
                        self.builder.network.kawpow_activation_time(),
                    )?),
                    Command::Inv => {
                        Message::Inv(<Vec<InventoryHash>>::raven_deserialize(&mut body_reader)?)
                    }
                    Command::GetData => Message::GetData(<Vec<InventoryHash>>::raven_deserialize(
                        &mut body_reader,
                    )?),
                    Command::NotFound => Message::NotFound(<Vec<InventoryHash>>::raven_deserialize(
                        &mut body_reader,
                    )?),
                    Command::Tx => {
                        Message::Tx(Arc::new(Transaction::raven_deserialize(&mut body_reader)?))
                    }
                    Command::MerkleBlock => Message::MerkleBlock(MerkleBlock::parse(
                        &mut body_reader,
                        self.builder.network.kawpow_activation_time(),
                    )?),
                    Command::Mempool => Message::Mempool,
                    Command::FilterLoad => {
                        let mut filter = Vec::with_capacity(body.len());
                        body_reader.read_to_end(&mut filter)?;
                        Message::FilterLoad(filter)
                    }
                    Command::Ping => Message::Ping(Nonce::raven_deserialize(&mut body_reader)?),
                    Command::Pong => Message::Pong(Nonce::raven_deserialize(&mut body_reader)?),
                    Command::Reject => self.read_reject(&mut body_reader)?,
                    Command::FeeFilter => {
                        Message::FeeFilter(u64::raven_deserialize(&mut body_reader)?)
                    }
                    Command::GetAssetData => {
                        Message::GetAssetData(GetAssetData::raven_deserialize(&mut body_reader)?)
                    }
                    Command::AssetData => {
                        if body.len() > constants::MAX_ASSET_PAYLOAD_LEN {
                            warn!(len = body.len(), "dropping oversized assetdata message");
                            Message::Unknown {
                                command: raw_command,
                            }
                        } else {
                            Message::AssetData(AssetData::parse(&body)?)
                        }
                    }
                };
                trace!("finished message decoding");
                Ok(Some(msg))
            }
        }
    }
}

impl Codec {
    fn read_reject<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        Ok(Message::Reject {
            message: String::raven_deserialize(&mut reader)?,
            ccode: RejectReason::from_code(reader.read_u8()?),
            reason: String::raven_deserialize(&mut reader)?,
            // Sometimes there's data, sometimes there isn't. There's no
            // length field, this is just implicitly encoded by the body_len.
            // All existing implementations only supply 32 bytes of data (the
            // hash identifying the rejected object) or none, so try to read
            // 32 bytes and ignore any failures.
            data: <[u8; 32]>::raven_deserialize(&mut reader).ok(),
        })
    }

    fn read_getblocks<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        let _received_version = ProtocolVersion::raven_deserialize(&mut reader)?;
        let get_blocks = GetBlocks::raven_deserialize(&mut reader)?;
        Ok(Message::GetBlocks(get_blocks))
    }

    fn read_getheaders<R: Read>(&self, mut reader: R) -> Result<Message, Error> {
        let _received_version = ProtocolVersion::raven_deserialize(&mut reader)?;
        let get_headers = GetHeaders::raven_deserialize(&mut reader)?;
        Ok(Message::GetHeaders(get_headers))
    }
}
