use std::fmt;
use std::str::FromStr;
use super::address::{MalformedAddressError, NetworkAddress};
use crate::{GeoTraceError, Result};

/// Inclusive range of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateRange {
    low: NetworkAddress,
    high: NetworkAddress,
}

impl PrivateRange {
    pub fn new(low: NetworkAddress, high: NetworkAddress) -> Self {
        if low <= high {
            Self { low, high }
        } else {
            Self { low: high, high: low }
        }
    }

    pub fn from_prefix(base: NetworkAddress, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_len))
        };
        let low = base.value() & mask;
        Self {
            low: NetworkAddress::from_u32(low),
            high: NetworkAddress::from_u32(low | !mask),
        }
    }

    pub fn low(&self) -> NetworkAddress {
        self.low
    }

    pub fn high(&self) -> NetworkAddress {
        self.high
    }

    pub fn contains(&self, address: NetworkAddress) -> bool {
        address >= self.low && address <= self.high
    }
}

impl fmt::Display for PrivateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

impl FromStr for PrivateRange {
    type Err = GeoTraceError;

    /// Accepts `a.b.c.d/len` or a single address.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once('/') {
            Some((base, len)) => {
                let base = NetworkAddress::parse(base)?;
                let prefix_len: u8 = len
                    .parse()
                    .ok()
                    .filter(|l| *l <= 32)
                    .ok_or_else(|| GeoTraceError::Configuration(format!("Invalid prefix length in range {:?}", s)))?;
                Ok(Self::from_prefix(base, prefix_len))
            }
            None => {
                let addr = NetworkAddress::parse(s)?;
                Ok(Self::new(addr, addr))
            }
        }
    }
}

/// Classifies addresses against a range table fixed at construction.
#[derive(Debug, Clone)]
pub struct PrivateAddressFilter {
    ranges: Vec<PrivateRange>,
}

impl PrivateAddressFilter {
    /// RFC1918, link-local and loopback.
    pub fn canonical() -> Self {
        Self {
            ranges: Self::canonical_ranges(),
        }
    }

    /// Canonical table followed by the given extra ranges in CIDR form.
    pub fn with_extra_ranges<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut ranges = Self::canonical_ranges();
        for spec in extra {
            ranges.push(spec.as_ref().parse()?);
        }
        Ok(Self { ranges })
    }

    fn canonical_ranges() -> Vec<PrivateRange> {
        vec![
            PrivateRange::from_prefix(NetworkAddress::new(10, 0, 0, 0), 8),
            PrivateRange::from_prefix(NetworkAddress::new(172, 16, 0, 0), 12),
            PrivateRange::from_prefix(NetworkAddress::new(192, 168, 0, 0), 16),
            PrivateRange::from_prefix(NetworkAddress::new(169, 254, 0, 0), 16),
            PrivateRange::from_prefix(NetworkAddress::new(127, 0, 0, 0), 8),
        ]
    }

    pub fn ranges(&self) -> &[PrivateRange] {
        &self.ranges
    }

    pub fn is_private(&self, address: NetworkAddress) -> bool {
        self.ranges.iter().any(|range| range.contains(address))
    }

    pub fn is_private_str(&self, address: &str) -> std::result::Result<bool, MalformedAddressError> {
        NetworkAddress::parse(address).map(|addr| self.is_private(addr))
    }
}

impl Default for PrivateAddressFilter {
    fn default() -> Self {
        Self::canonical()
    }
}
