//! Request/response object model shared by the zone engine and its DNS
//! client. Wire encoding is the transport's business; the engine only
//! builds and inspects these structures.

pub mod enums;
pub mod header;
pub mod question;
pub mod resource;
pub mod serial;

use enums::{DNSResourceType, ResponseCode};
use header::DNSHeader;
use question::DNSQuestion;
use resource::DNSResource;
use serde::{Deserialize, Serialize};

pub use serial::Serial;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
    /// Advertised EDNS UDP payload size, if any
    pub udp_payload_size: Option<u16>,
}

impl DNSPacket {
    /// Single-question standard query with a random id
    pub fn query(name: &str, qtype: DNSResourceType) -> Self {
        Self {
            header: DNSHeader::query(rand::random()),
            questions: vec![DNSQuestion::new(name, qtype)],
            ..Default::default()
        }
    }

    /// Empty response skeleton echoing the question section of `query`
    pub fn response_to(query: &DNSPacket) -> Self {
        Self {
            header: DNSHeader::response_to(&query.header),
            questions: query.questions.clone(),
            udp_payload_size: query.udp_payload_size,
            ..Default::default()
        }
    }

    pub fn question(&self) -> Option<&DNSQuestion> {
        self.questions.first()
    }

    pub fn rcode(&self) -> ResponseCode {
        self.header.response_code()
    }

    pub fn set_rcode(&mut self, rcode: ResponseCode) {
        self.header.rcode = rcode.to_u8();
    }

    /// Bring the header section counts in line with the section vectors
    pub fn update_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.resources.len() as u16;
    }

    pub fn valid(&self) -> bool {
        self.header.qdcount as usize == self.questions.len()
            && self.header.ancount as usize == self.answers.len()
            && self.header.nscount as usize == self.authorities.len()
            && self.header.arcount as usize == self.resources.len()
    }
}
