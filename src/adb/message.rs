// ADB message framing: a 24-byte little-endian header followed by the payload.
//
//   command | arg0 | arg1 | data_length | data_checksum | magic
//
// magic is the bitwise complement of command. The "checksum" is a plain sum
// of the payload bytes (not a CRC) and must stay that way for compatibility
// with adbd.

use super::error::{AdbError, AdbResult};
use std::fmt;

pub const HEADER_SIZE: usize = 24;

/// Protocol version sent in our CNXN.
pub const ADB_VERSION: u32 = 0x0100_0000;

/// Largest payload we advertise in CNXN; the device may negotiate lower.
pub const MAX_ADB_DATA: u32 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Sync,
    Cnxn,
    Auth,
    Open,
    Okay,
    Clse,
    Wrte,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Sync,
        Command::Cnxn,
        Command::Auth,
        Command::Open,
        Command::Okay,
        Command::Clse,
        Command::Wrte,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Sync => "SYNC",
            Command::Cnxn => "CNXN",
            Command::Auth => "AUTH",
            Command::Open => "OPEN",
            Command::Okay => "OKAY",
            Command::Clse => "CLSE",
            Command::Wrte => "WRTE",
        }
    }

    /// The little-endian u32 spelling of the 4-character name.
    pub fn to_wire(self) -> u32 {
        let name = self.name().as_bytes();
        u32::from_le_bytes([name[0], name[1], name[2], name[3]])
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.to_wire() == value)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbMessage {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl AdbMessage {
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    pub fn checksum(&self) -> u32 {
        checksum(&self.payload)
    }

    pub fn magic(&self) -> u32 {
        self.command.to_wire() ^ 0xFFFF_FFFF
    }

    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let words = [
            self.command.to_wire(),
            self.arg0,
            self.arg1,
            self.payload.len() as u32,
            self.checksum(),
            self.magic(),
        ];
        let mut header = [0u8; HEADER_SIZE];
        for (slot, word) in header.chunks_exact_mut(4).zip(words) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
        header
    }

    /// Header followed by the payload, as it appears on the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.header());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decodes a complete header + payload buffer.
    pub fn decode(bytes: &[u8]) -> AdbResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(AdbError::protocol(format!(
                "message too short: {} bytes, need at least {HEADER_SIZE}",
                bytes.len()
            )));
        }
        let raw = RawHeader::decode(&bytes[..HEADER_SIZE])?;
        raw.finish(bytes[HEADER_SIZE..].to_vec())
    }
}

impl fmt::Display for AdbMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:#x}, {:#x}, {} bytes)",
            self.command,
            self.arg0,
            self.arg1,
            self.payload.len()
        )
    }
}

/// A decoded header whose payload has not been read yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub data_length: u32,
    pub data_checksum: u32,
}

impl RawHeader {
    pub fn decode(header: &[u8]) -> AdbResult<Self> {
        if header.len() != HEADER_SIZE {
            return Err(AdbError::protocol(format!(
                "bad header size: {} bytes, expected {HEADER_SIZE}",
                header.len()
            )));
        }
        let mut words = [0u32; 6];
        for (word, chunk) in words.iter_mut().zip(header.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let [wire, arg0, arg1, data_length, data_checksum, magic] = words;

        let command = Command::from_wire(wire).ok_or_else(|| {
            AdbError::protocol(format!(
                "unknown command {wire:#010x} ({:?})",
                String::from_utf8_lossy(&wire.to_le_bytes())
            ))
        })?;
        if magic != wire ^ 0xFFFF_FFFF {
            return Err(AdbError::protocol(format!(
                "bad magic {magic:#010x} for {command}"
            )));
        }

        Ok(Self {
            command,
            arg0,
            arg1,
            data_length,
            data_checksum,
        })
    }

    /// Attaches the payload, verifying length and checksum.
    pub fn finish(self, payload: Vec<u8>) -> AdbResult<AdbMessage> {
        let actual_checksum = checksum(&payload);
        if payload.len() as u64 != u64::from(self.data_length) || actual_checksum != self.data_checksum
        {
            return Err(AdbError::DataIntegrity {
                expected_length: self.data_length,
                actual_length: payload.len() as u32,
                expected_checksum: self.data_checksum,
                actual_checksum,
            });
        }
        Ok(AdbMessage {
            command: self.command,
            arg0: self.arg0,
            arg1: self.arg1,
            payload,
        })
    }
}
