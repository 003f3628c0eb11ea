//! Builders for capture files and an in-memory location database.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use super::address::NetworkAddress;
use super::geo::{GeoLocation, LocationLookup, QueryError};

pub const BASE_TS: u32 = 1_700_000_000;

pub fn ipv4_header(source: [u8; 4], destination: [u8; 4]) -> Vec<u8> {
    let mut header = vec![
        0x45, 0x00, 0x00, 0x14, // version/IHL, TOS, total length
        0x00, 0x00, 0x40, 0x00, // id, flags (DF)
        0x40, 0x06, 0x00, 0x00, // TTL 64, TCP, checksum
    ];
    header.extend_from_slice(&source);
    header.extend_from_slice(&destination);
    header
}

pub fn ethernet_ipv4_frame(source: [u8; 4], destination: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x00, 0x66, 0x77, 0x88, 0x99, 0xaa, 0x08, 0x00];
    frame.extend_from_slice(&ipv4_header(source, destination));
    frame
}

pub fn write_legacy_pcap(frames: &[Vec<u8>]) -> NamedTempFile {
    frames
        .iter()
        .fold(PcapBuilder::new(1), |builder, frame| builder.record(frame))
        .write()
}

/// Little-endian classic pcap writer.
pub struct PcapBuilder {
    bytes: Vec<u8>,
    records: u32,
    fraction: u32,
}

impl PcapBuilder {
    pub fn new(linktype: u32) -> Self {
        Self::with_magic(0xa1b2_c3d4, linktype)
    }

    /// Nanosecond-resolution variant of the classic format.
    pub fn nanosecond(linktype: u32) -> Self {
        Self::with_magic(0xa1b2_3c4d, linktype)
    }

    fn with_magic(magic: u32, linktype: u32) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&magic.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&65535u32.to_le_bytes());
        bytes.extend_from_slice(&linktype.to_le_bytes());
        Self { bytes, records: 0, fraction: 0 }
    }

    /// Sub-second timestamp field for the records that follow.
    pub fn fraction(mut self, fraction: u32) -> Self {
        self.fraction = fraction;
        self
    }

    pub fn record(mut self, data: &[u8]) -> Self {
        self.push_header(data.len() as u32);
        self.bytes.extend_from_slice(data);
        self
    }

    /// Header announces the full frame but only `keep` bytes follow.
    pub fn truncated_record(mut self, data: &[u8], keep: usize) -> Self {
        self.push_header(data.len() as u32);
        self.bytes.extend_from_slice(&data[..keep]);
        self
    }

    fn push_header(&mut self, len: u32) {
        self.bytes.extend_from_slice(&(BASE_TS + self.records).to_le_bytes());
        self.bytes.extend_from_slice(&self.fraction.to_le_bytes());
        self.bytes.extend_from_slice(&len.to_le_bytes());
        self.bytes.extend_from_slice(&len.to_le_bytes());
        self.records += 1;
    }

    pub fn write(self) -> NamedTempFile {
        Self::raw_bytes(&self.bytes)
    }

    pub fn raw_bytes(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp file");
        file.write_all(bytes).expect("write temp file");
        file.flush().expect("flush temp file");
        file
    }
}

/// Pads `frame` with zeros up to `len` bytes.
pub fn oversized_frame(frame: Vec<u8>, len: usize) -> Vec<u8> {
    let mut frame = frame;
    frame.resize(len, 0);
    frame
}

/// Little-endian pcapng writer: one section, interfaces, enhanced packets.
pub struct PcapNgBuilder {
    bytes: Vec<u8>,
}

impl PcapNgBuilder {
    pub fn new() -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&0x1a2b_3c4du32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(-1i64).to_le_bytes());
        let mut builder = Self { bytes: Vec::new() };
        builder.push_block(0x0a0d_0d0a, &body);
        builder
    }

    /// Adds an interface; `tsresol` is the raw `if_tsresol` option, if any.
    pub fn interface(mut self, linktype: u16, tsresol: Option<u8>) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&linktype.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&262_144u32.to_le_bytes());
        if let Some(resol) = tsresol {
            body.extend_from_slice(&9u16.to_le_bytes());
            body.extend_from_slice(&1u16.to_le_bytes());
            body.extend_from_slice(&[resol, 0, 0, 0]);
            body.extend_from_slice(&[0, 0, 0, 0]);
        }
        self.push_block(0x0000_0001, &body);
        self
    }

    /// Adds an enhanced packet block with a raw timestamp in interface units.
    pub fn packet(mut self, if_id: u32, ts: u64, data: &[u8]) -> Self {
        let mut body = Vec::new();
        body.extend_from_slice(&if_id.to_le_bytes());
        body.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
        body.extend_from_slice(&(ts as u32).to_le_bytes());
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        body.resize(body.len() + (4 - data.len() % 4) % 4, 0);
        self.push_block(0x0000_0006, &body);
        self
    }

    fn push_block(&mut self, block_type: u32, body: &[u8]) {
        let len = (body.len() + 12) as u32;
        self.bytes.extend_from_slice(&block_type.to_le_bytes());
        self.bytes.extend_from_slice(&len.to_le_bytes());
        self.bytes.extend_from_slice(body);
        self.bytes.extend_from_slice(&len.to_le_bytes());
    }

    pub fn write(self) -> NamedTempFile {
        PcapBuilder::raw_bytes(&self.bytes)
    }
}

/// Writes a MaxMind DB (IPv4 tree, 24-bit records) holding GeoIP2 City
/// records, so the real reader can be queried in tests.
#[derive(Default)]
pub struct MmdbBuilder {
    // Each node holds its two children; `None` is an empty branch.
    nodes: Vec<[Option<MmdbChild>; 2]>,
    records: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
enum MmdbChild {
    Node(usize),
    Record(usize),
}

impl MmdbBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![[None, None]],
            records: Vec::new(),
        }
    }

    /// Maps `network/prefix_len` to a City record built from `location`.
    pub fn city(mut self, network: NetworkAddress, prefix_len: u32, location: &GeoLocation) -> Self {
        let record = self.records.len();
        self.records.push(encode_city(location));

        let bits = network.value();
        let mut node = 0;
        for depth in 0..prefix_len {
            let bit = ((bits >> (31 - depth)) & 1) as usize;
            if depth + 1 == prefix_len {
                self.nodes[node][bit] = Some(MmdbChild::Record(record));
                break;
            }
            node = match self.nodes[node][bit] {
                Some(MmdbChild::Node(next)) => next,
                _ => {
                    self.nodes.push([None, None]);
                    let next = self.nodes.len() - 1;
                    self.nodes[node][bit] = Some(MmdbChild::Node(next));
                    next
                }
            };
        }
        self
    }

    pub fn write(self) -> NamedTempFile {
        let node_count = self.nodes.len();
        let mut offsets = Vec::with_capacity(self.records.len());
        let mut data = Vec::new();
        for record in &self.records {
            offsets.push(data.len());
            data.extend_from_slice(record);
        }

        let mut bytes = Vec::new();
        for node in &self.nodes {
            for child in node {
                let value = match child {
                    None => node_count,
                    Some(MmdbChild::Node(next)) => *next,
                    Some(MmdbChild::Record(record)) => node_count + 16 + offsets[*record],
                };
                bytes.extend_from_slice(&(value as u32).to_be_bytes()[1..]);
            }
        }
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&data);
        bytes.extend_from_slice(b"\xab\xcd\xefMaxMind.com");
        bytes.extend_from_slice(&mmdb_map(vec![
            ("binary_format_major_version", mmdb_u16(2)),
            ("binary_format_minor_version", mmdb_u16(0)),
            ("build_epoch", mmdb_u64(u64::from(BASE_TS))),
            ("database_type", mmdb_str("GeoIP2-City")),
            ("description", mmdb_map(vec![("en", mmdb_str("Test City database"))])),
            ("ip_version", mmdb_u16(4)),
            ("languages", mmdb_array(vec![mmdb_str("en")])),
            ("node_count", mmdb_u32(node_count as u32)),
            ("record_size", mmdb_u16(24)),
        ]));
        PcapBuilder::raw_bytes(&bytes)
    }
}

fn encode_city(location: &GeoLocation) -> Vec<u8> {
    let names = |name: &str| mmdb_map(vec![("en", mmdb_str(name))]);
    let mut entries = Vec::new();

    if let Some(city) = &location.city {
        entries.push(("city", mmdb_map(vec![("names", names(city))])));
    }

    let mut country = Vec::new();
    if let Some(code) = &location.country_code {
        country.push(("iso_code", mmdb_str(code)));
    }
    if let Some(name) = &location.country_name {
        country.push(("names", names(name)));
    }
    if !country.is_empty() {
        entries.push(("country", mmdb_map(country)));
    }

    let mut geo = Vec::new();
    if let Some(latitude) = location.latitude {
        geo.push(("latitude", mmdb_f64(latitude)));
    }
    if let Some(longitude) = location.longitude {
        geo.push(("longitude", mmdb_f64(longitude)));
    }
    if let Some(timezone) = &location.timezone {
        geo.push(("time_zone", mmdb_str(timezone)));
    }
    if !geo.is_empty() {
        entries.push(("location", mmdb_map(geo)));
    }

    if let Some(region) = &location.region {
        entries.push(("subdivisions", mmdb_array(vec![mmdb_map(vec![("names", names(region))])])));
    }

    mmdb_map(entries)
}

// Control bytes for the MaxMind data section. Every size used here is
// below 29, so it fits in the control byte itself.
fn mmdb_control(type_num: u8, size: usize) -> Vec<u8> {
    if type_num <= 7 {
        vec![(type_num << 5) | size as u8]
    } else {
        vec![size as u8, type_num - 7]
    }
}

fn mmdb_str(value: &str) -> Vec<u8> {
    let mut out = mmdb_control(2, value.len());
    out.extend_from_slice(value.as_bytes());
    out
}

fn mmdb_f64(value: f64) -> Vec<u8> {
    let mut out = mmdb_control(3, 8);
    out.extend_from_slice(&value.to_be_bytes());
    out
}

fn mmdb_u16(value: u16) -> Vec<u8> {
    let mut out = mmdb_control(5, 2);
    out.extend_from_slice(&value.to_be_bytes());
    out
}

fn mmdb_u32(value: u32) -> Vec<u8> {
    let mut out = mmdb_control(6, 4);
    out.extend_from_slice(&value.to_be_bytes());
    out
}

fn mmdb_u64(value: u64) -> Vec<u8> {
    let mut out = mmdb_control(9, 8);
    out.extend_from_slice(&value.to_be_bytes());
    out
}

fn mmdb_map(entries: Vec<(&str, Vec<u8>)>) -> Vec<u8> {
    let mut out = mmdb_control(7, entries.len());
    for (key, value) in entries {
        out.extend(mmdb_str(key));
        out.extend(value);
    }
    out
}

fn mmdb_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = mmdb_control(11, items.len());
    for item in items {
        out.extend(item);
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter(Arc<AtomicUsize>);

impl ReleaseCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct FakeDatabase {
    locations: HashMap<NetworkAddress, GeoLocation>,
    failures: HashMap<NetworkAddress, String>,
    queried: Arc<Mutex<Vec<NetworkAddress>>>,
    released: ReleaseCounter,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, address: NetworkAddress, location: GeoLocation) -> Self {
        self.locations.insert(address, location);
        self
    }

    pub fn with_country(self, address: NetworkAddress, country: &str) -> Self {
        let location = GeoLocation {
            country_name: Some(country.to_string()),
            ..GeoLocation::default()
        };
        self.with_location(address, location)
    }

    pub fn with_failure(mut self, address: NetworkAddress, reason: &str) -> Self {
        self.failures.insert(address, reason.to_string());
        self
    }

    pub fn queried(&self) -> Arc<Mutex<Vec<NetworkAddress>>> {
        Arc::clone(&self.queried)
    }

    pub fn release_counter(&self) -> ReleaseCounter {
        self.released.clone()
    }
}

impl LocationLookup for FakeDatabase {
    fn query(&self, address: NetworkAddress) -> Result<GeoLocation, QueryError> {
        self.queried.lock().unwrap().push(address);
        if let Some(reason) = self.failures.get(&address) {
            return Err(QueryError::Database(reason.clone()));
        }
        self.locations.get(&address).cloned().ok_or(QueryError::NotFound)
    }
}

impl Drop for FakeDatabase {
    fn drop(&mut self) {
        self.released.0.fetch_add(1, Ordering::SeqCst);
    }
}
