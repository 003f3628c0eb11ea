use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Block, LegacyPcapReader, Linktype, PcapBlockOwned, PcapError, PcapNGReader};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use crate::{GeoTraceError, Result};

const PCAPNG_MAGIC: [u8; 4] = [0x0A, 0x0D, 0x0D, 0x0A];

pub const DEFAULT_BUFFER_SIZE: usize = 65536;

/// Upper bound for the reader buffer when a single record does not fit.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

const MICROS_PER_SEC: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    Raw,
    LinuxSll,
    Null,
    Other(i32),
}

impl From<Linktype> for LinkType {
    fn from(linktype: Linktype) -> Self {
        match linktype {
            Linktype::ETHERNET => LinkType::Ethernet,
            Linktype::RAW | Linktype::IPV4 => LinkType::Raw,
            Linktype::LINUX_SLL => LinkType::LinuxSll,
            Linktype::NULL => LinkType::Null,
            Linktype(other) => LinkType::Other(other),
        }
    }
}

/// One captured frame, copied out of the reader's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub ts_sec: u64,
    pub ts_usec: u32,
    pub link_type: LinkType,
    pub data: Vec<u8>,
}

impl PacketRecord {
    pub fn new(link_type: LinkType, data: Vec<u8>) -> Self {
        Self {
            ts_sec: 0,
            ts_usec: 0,
            link_type,
            data,
        }
    }

    pub fn with_timestamp(mut self, ts_sec: u64, ts_usec: u32) -> Self {
        self.ts_sec = ts_sec;
        self.ts_usec = ts_usec;
        self
    }
}

/// Forward-only stream of records. `Ok(None)` marks the end of the capture.
pub trait CaptureRecordSource {
    fn next_record(&mut self) -> Result<Option<PacketRecord>>;
}

impl<I> CaptureRecordSource for I
where
    I: Iterator<Item = Result<PacketRecord>>,
{
    fn next_record(&mut self) -> Result<Option<PacketRecord>> {
        self.next().transpose()
    }
}

/// Link type and clock of one capture interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interface {
    link_type: LinkType,
    // Timestamp units per second.
    ts_resolution: u64,
    ts_offset: u64,
}

impl Interface {
    fn new(link_type: LinkType, ts_resolution: u64) -> Self {
        Self {
            link_type,
            ts_resolution,
            ts_offset: 0,
        }
    }

    fn micros(&self, fraction: u64) -> u32 {
        (fraction * MICROS_PER_SEC / self.ts_resolution) as u32
    }
}

/// Reads classic pcap or pcapng files, picked by the file's magic number.
pub struct PcapFileSource {
    reader: Box<dyn PcapReaderIterator + Send>,
    capacity: usize,
    // Legacy files have a single entry; pcapng has one per interface block.
    interfaces: Vec<Interface>,
    records_read: u64,
}

impl PcapFileSource {
    pub fn open<P: AsRef<Path>>(path: P, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| GeoTraceError::CaptureOpen(format!("{}: {}", path.display(), e)))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| GeoTraceError::CaptureOpen(format!("{}: file too short for a capture header", path.display())))?;
        file.seek(SeekFrom::Start(0))?;

        let capacity = buffer_size.max(DEFAULT_BUFFER_SIZE);
        let reader: Box<dyn PcapReaderIterator + Send> = if magic == PCAPNG_MAGIC {
            Box::new(PcapNGReader::new(capacity, file).map_err(|e| {
                GeoTraceError::CaptureOpen(format!("{}: invalid pcapng header: {:?}", path.display(), e))
            })?)
        } else {
            Box::new(LegacyPcapReader::new(capacity, file).map_err(|e| {
                GeoTraceError::CaptureOpen(format!("{}: invalid pcap header: {:?}", path.display(), e))
            })?)
        };

        log::debug!("Opened capture {}", path.display());

        Ok(Self {
            reader,
            capacity,
            interfaces: Vec::new(),
            records_read: 0,
        })
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Doubles the buffer when the next record is larger than it.
    fn grow_buffer(&mut self) -> Result<()> {
        let capacity = self.capacity.saturating_mul(2);
        if capacity > MAX_BUFFER_SIZE {
            return Err(GeoTraceError::CaptureRead(format!(
                "record {} does not fit in {} bytes",
                self.records_read + 1,
                MAX_BUFFER_SIZE
            )));
        }
        self.reader.grow(capacity);
        self.capacity = capacity;
        log::debug!("Grew capture buffer to {} bytes", capacity);
        Ok(())
    }
}

impl CaptureRecordSource for PcapFileSource {
    fn next_record(&mut self) -> Result<Option<PacketRecord>> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let record = translate_block(&block, &mut self.interfaces);
                    drop(block);
                    self.reader.consume(offset);
                    if let Some(record) = record {
                        self.records_read += 1;
                        return Ok(Some(record));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete) => {
                    if self.reader.reader_exhausted() {
                        return Err(GeoTraceError::CaptureRead(format!(
                            "capture truncated after {} records",
                            self.records_read
                        )));
                    }
                    let buffered = self.reader.data().len();
                    self.reader
                        .refill()
                        .map_err(|e| GeoTraceError::CaptureRead(format!("refill error: {:?}", e)))?;
                    // A full buffer refills without reading anything.
                    if !self.reader.reader_exhausted() && self.reader.data().len() == buffered {
                        self.grow_buffer()?;
                    }
                }
                Err(e) => {
                    return Err(GeoTraceError::CaptureRead(format!(
                        "parse error after {} records: {:?}",
                        self.records_read, e
                    )))
                }
            }
        }
    }
}

fn translate_block(block: &PcapBlockOwned<'_>, interfaces: &mut Vec<Interface>) -> Option<PacketRecord> {
    match block {
        PcapBlockOwned::LegacyHeader(header) => {
            let resolution = if header.is_nanosecond_precision() {
                NANOS_PER_SEC
            } else {
                MICROS_PER_SEC
            };
            interfaces.clear();
            interfaces.push(Interface::new(LinkType::from(header.network), resolution));
            None
        }
        PcapBlockOwned::Legacy(packet) => {
            let interface = interfaces
                .first()
                .copied()
                .unwrap_or_else(|| Interface::new(LinkType::Ethernet, MICROS_PER_SEC));
            Some(
                PacketRecord::new(interface.link_type, packet.data.to_vec())
                    .with_timestamp(u64::from(packet.ts_sec), interface.micros(u64::from(packet.ts_usec))),
            )
        }
        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
            // Interface ids restart in every section.
            interfaces.clear();
            None
        }
        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
            let resolution = idb.ts_resolution().unwrap_or_else(|| {
                log::debug!("Invalid if_tsresol {}, assuming microseconds", idb.if_tsresol);
                MICROS_PER_SEC
            });
            interfaces.push(Interface {
                link_type: LinkType::from(idb.linktype),
                ts_resolution: resolution,
                ts_offset: idb.ts_offset(),
            });
            None
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
            let interface = interfaces
                .get(epb.if_id as usize)
                .copied()
                .unwrap_or_else(|| Interface::new(LinkType::Other(-1), MICROS_PER_SEC));
            let caplen = (epb.caplen as usize).min(epb.data.len());
            let (ts_sec, fraction) = epb.decode_ts(interface.ts_offset, interface.ts_resolution);
            Some(
                PacketRecord::new(interface.link_type, epb.data[..caplen].to_vec())
                    .with_timestamp(u64::from(ts_sec), interface.micros(u64::from(fraction))),
            )
        }
        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
            let link_type = interfaces.first().map(|i| i.link_type).unwrap_or(LinkType::Other(-1));
            Some(PacketRecord::new(link_type, spb.packet_data().to_vec()))
        }
        PcapBlockOwned::NG(_) => None,
    }
}
