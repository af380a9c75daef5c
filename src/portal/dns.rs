//! Catch-all DNS responder.
//!
//! Every query is answered with a single A record pointing at the portal
//! gateway, which makes client operating systems open the captive portal.
//!
//! # Response Layout
//!
//! ```text
//! header   id (copied) | 0x8180 | QDCOUNT (copied) | 1 | 0 | 0
//! question copied from the query
//! answer   C0 0C | 00 01 | 00 01 | TTL 60 | 00 04 | gateway
//! ```
//!
//! A query without a question gets the bare header with ANCOUNT 0, since the
//! answer name would have nothing to point at.

use std::net::Ipv4Addr;

/// DNS header length.
pub const HEADER_LEN: usize = 12;

/// TTL of the forged answer, in seconds.
pub const ANSWER_TTL: u32 = 60;

/// Standard response, recursion desired and available, no error.
const RESPONSE_FLAGS: [u8; 2] = [0x81, 0x80];

/// Name pointer to offset 12 (the first question).
const NAME_POINTER: [u8; 2] = [0xC0, 0x0C];

/// DNS responder errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// Datagram shorter than a DNS header.
    TooShort(usize),
}

impl std::fmt::Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort(len) => write!(
                f,
                "datagram of {} bytes is shorter than the {} byte header",
                len, HEADER_LEN
            ),
        }
    }
}

impl std::error::Error for DnsError {}

/// Stateless forger of A answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsResponder {
    gateway: Ipv4Addr,
}

impl DnsResponder {
    /// Answer every query with `gateway`.
    pub fn new(gateway: Ipv4Addr) -> Self {
        Self { gateway }
    }

    /// Address placed in every answer.
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Build the response datagram for `query`.
    pub fn build_response(&self, query: &[u8]) -> Result<Vec<u8>, DnsError> {
        if query.len() < HEADER_LEN {
            return Err(DnsError::TooShort(query.len()));
        }

        let qdcount = u16::from_be_bytes([query[4], query[5]]);
        let questions_end = questions_end(query, qdcount).unwrap_or(query.len());
        let has_question = questions_end > HEADER_LEN;

        let mut response = Vec::with_capacity(questions_end + 16);
        response.extend_from_slice(&query[0..2]);
        response.extend_from_slice(&RESPONSE_FLAGS);
        response.extend_from_slice(&query[4..6]);
        response.extend_from_slice(&u16::from(has_question).to_be_bytes());
        response.extend_from_slice(&0u16.to_be_bytes());
        response.extend_from_slice(&0u16.to_be_bytes());

        if !has_question {
            return Ok(response);
        }

        response.extend_from_slice(&query[HEADER_LEN..questions_end]);

        response.extend_from_slice(&NAME_POINTER);
        response.extend_from_slice(&1u16.to_be_bytes()); // type A
        response.extend_from_slice(&1u16.to_be_bytes()); // class IN
        response.extend_from_slice(&ANSWER_TTL.to_be_bytes());
        response.extend_from_slice(&4u16.to_be_bytes());
        response.extend_from_slice(&self.gateway.octets());

        Ok(response)
    }
}

/// Offset just past the `count` questions, or `None` if they cannot be
/// walked (truncated or compressed names).
fn questions_end(query: &[u8], count: u16) -> Option<usize> {
    let mut offset = HEADER_LEN;
    for _ in 0..count {
        loop {
            let len = *query.get(offset)? as usize;
            offset += 1;
            if len == 0 {
                break;
            }
            // Pointers never appear in a plain query name
            if len & 0xC0 != 0 {
                return None;
            }
            offset += len;
        }
        // QTYPE + QCLASS
        offset += 4;
        if offset > query.len() {
            return None;
        }
    }
    Some(offset)
}
