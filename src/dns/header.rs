use serde::{Deserialize, Serialize};

use super::enums::ResponseCode;

/// Standard query opcode
pub const OPCODE_QUERY: u8 = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DNSHeader {
    /// Header for an outgoing standard query
    pub fn query(id: u16) -> Self {
        Self {
            id,
            opcode: OPCODE_QUERY,
            qdcount: 1,
            ..Default::default()
        }
    }

    /// Header answering `query`, copying its id, opcode and RD flag
    pub fn response_to(query: &DNSHeader) -> Self {
        Self {
            id: query.id,
            qr: true,
            opcode: query.opcode,
            rd: query.rd,
            rcode: ResponseCode::NoError.to_u8(),
            qdcount: query.qdcount,
            ..Default::default()
        }
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from_u8(self.rcode)
    }
}
