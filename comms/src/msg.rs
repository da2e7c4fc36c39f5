use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const CONTRIBUTION: Header = 2;
const REDUCED: Header = 3;
const BROADCAST: Header = 4;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    /// A rank's local buffer sent to the coordinator for reduction.
    Contribution(&'a [f32]),
    /// The reduced buffer sent back by the coordinator.
    Reduced(&'a [f32]),
    /// A buffer being relayed from a broadcast root.
    Broadcast(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// First message of a peer, announcing who it claims to be.
    Hello {
        rank: usize,
        world_size: usize,
        backend: String,
    },
    /// Sent by the coordinator once every peer has joined.
    Welcome,
    /// A rank entered a barrier.
    Barrier,
    /// The coordinator lets every rank leave the barrier.
    Release,
    /// Tear down request and acknowledgement.
    Close,
}

/// The application layer message for the entire system.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Command {
    /// Returns a short name of the command, useful for logging protocol violations.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Hello { .. } => "control/hello",
            Command::Welcome => "control/welcome",
            Command::Barrier => "control/barrier",
            Command::Release => "control/release",
            Command::Close => "control/close",
        }
    }
}

impl<'a> Payload<'a> {
    /// The values carried by the payload, whatever its kind.
    pub fn values(&self) -> &'a [f32] {
        match self {
            Payload::Contribution(nums) | Payload::Reduced(nums) | Payload::Broadcast(nums) => nums,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Contribution(_) => "data/contribution",
            Payload::Reduced(_) => "data/reduced",
            Payload::Broadcast(_) => "data/broadcast",
        }
    }
}

impl Msg<'_> {
    /// Returns a short name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(cmd) => cmd.kind(),
            Msg::Data(payload) => payload.kind(),
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Contribution(nums) => (CONTRIBUTION, nums),
                    Payload::Reduced(nums) => (REDUCED, nums),
                    Payload::Broadcast(nums) => (BROADCAST, nums),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Ok(Some(bytemuck::cast_slice(nums)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let buf: &'a [u8] = buf;
        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut header = [0; HEADER_SIZE];
        header.copy_from_slice(kind_buf);
        let kind = Header::from_be_bytes(header);

        match kind {
            ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            CONTRIBUTION | REDUCED | BROADCAST => {
                let nums: &[f32] = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Payload of {} bytes is not an f32 slice: {err}", rest.len()),
                    )
                })?;

                let payload = match kind {
                    CONTRIBUTION => Payload::Contribution(nums),
                    REDUCED => Payload::Reduced(nums),
                    _ => Payload::Broadcast(nums),
                };

                Ok(Self::Data(payload))
            }
            other => Self::invalid_kind(other),
        }
    }
}
