use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An IPv4 address compared and hashed by its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NetworkAddress(u32);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed IPv4 address {input:?}: {reason}")]
pub struct MalformedAddressError {
    pub input: String,
    pub reason: MalformedReason,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    #[error("expected 4 segments, found {0}")]
    SegmentCount(usize),

    #[error("segment {0:?} is not a decimal number")]
    NonNumeric(String),

    #[error("segment {0:?} is outside 0-255")]
    OctetOutOfRange(String),
}

impl NetworkAddress {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(u32::from_be_bytes([a, b, c, d]))
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn to_ipv4(self) -> Ipv4Addr {
        Ipv4Addr::from(self.0)
    }

    /// Strict dotted-quad parsing. Leading zeros are read as decimal.
    pub fn parse(input: &str) -> Result<Self, MalformedAddressError> {
        let malformed = |reason| MalformedAddressError {
            input: input.to_string(),
            reason,
        };

        let segments: Vec<&str> = input.trim().split('.').collect();
        if segments.len() != 4 {
            return Err(malformed(MalformedReason::SegmentCount(segments.len())));
        }

        let mut octets = [0u8; 4];
        for (slot, segment) in octets.iter_mut().zip(&segments) {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed(MalformedReason::NonNumeric(segment.to_string())));
            }
            // Long digit strings overflow u16 as well as u8, so compare on u32.
            let value: u32 = segment
                .parse()
                .map_err(|_| malformed(MalformedReason::OctetOutOfRange(segment.to_string())))?;
            if value > 255 {
                return Err(malformed(MalformedReason::OctetOutOfRange(segment.to_string())));
            }
            *slot = value as u8;
        }

        Ok(Self(u32::from_be_bytes(octets)))
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.octets();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl FromStr for NetworkAddress {
    type Err = MalformedAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Ipv4Addr> for NetworkAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self(u32::from(addr))
    }
}

impl From<NetworkAddress> for Ipv4Addr {
    fn from(addr: NetworkAddress) -> Self {
        addr.to_ipv4()
    }
}

impl From<NetworkAddress> for String {
    fn from(addr: NetworkAddress) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for NetworkAddress {
    type Error = MalformedAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
