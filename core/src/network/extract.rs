use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::vlan::VlanPacket;
use pnet_packet::Packet;
use serde::{Deserialize, Serialize};
use super::address::NetworkAddress;
use super::packet_capture::{LinkType, PacketRecord};

const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;
const ETHERTYPE_IPV4: u16 = 0x0800;
const BSD_AF_INET: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Source => "Source IP",
            Role::Destination => "Destination IP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub source: NetworkAddress,
    pub destination: NetworkAddress,
}

impl Endpoints {
    /// Source first, then destination.
    pub fn candidates(&self) -> [(Role, NetworkAddress); 2] {
        [(Role::Source, self.source), (Role::Destination, self.destination)]
    }
}

/// Pulls IPv4 endpoints out of captured frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressExtractor;

impl AddressExtractor {
    pub fn new() -> Self {
        Self
    }

    /// `None` for anything that does not carry a readable IPv4 header.
    pub fn extract(&self, record: &PacketRecord) -> Option<Endpoints> {
        let data = record.data.as_slice();
        match record.link_type {
            LinkType::Ethernet => Self::from_ethernet(data),
            LinkType::Raw => Self::from_ipv4(data),
            LinkType::LinuxSll => {
                let header = data.get(..SLL_HEADER_LEN)?;
                if u16::from_be_bytes([header[14], header[15]]) != ETHERTYPE_IPV4 {
                    return None;
                }
                Self::from_ipv4(&data[SLL_HEADER_LEN..])
            }
            LinkType::Null => {
                let header = data.get(..NULL_HEADER_LEN)?;
                let family = [header[0], header[1], header[2], header[3]];
                // Written in the capturing host's byte order.
                if u32::from_le_bytes(family) != BSD_AF_INET && u32::from_be_bytes(family) != BSD_AF_INET {
                    return None;
                }
                Self::from_ipv4(&data[NULL_HEADER_LEN..])
            }
            LinkType::Other(_) => None,
        }
    }

    fn from_ethernet(data: &[u8]) -> Option<Endpoints> {
        let ethernet = EthernetPacket::new(data)?;
        match ethernet.get_ethertype() {
            EtherTypes::Ipv4 => Self::from_ipv4(ethernet.payload()),
            EtherTypes::Vlan => {
                let vlan = VlanPacket::new(ethernet.payload())?;
                if vlan.get_ethertype() == EtherTypes::Ipv4 {
                    Self::from_ipv4(vlan.payload())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn from_ipv4(data: &[u8]) -> Option<Endpoints> {
        let ipv4 = Ipv4Packet::new(data)?;
        if ipv4.get_version() != 4 {
            return None;
        }
        Some(Endpoints {
            source: ipv4.get_source().into(),
            destination: ipv4.get_destination().into(),
        })
    }
}
