//! Protocol decoders feeding [`MarketEvent`] records.
//!
//! A decoder turns raw feed bytes into the fixed 64-byte record and stamps
//! `receive_timestamp` with the cycle counter at ingress. The trait is the
//! seam the runtime cares about; the two implementations here cover the
//! reference wire formats. Returning 0 from [`FeedDecoder::parse`] means
//! the buffer does not yet hold a complete message.

use crate::clock;
use crate::event::{EventType, MarketEvent, PRICE_SCALE, Symbol};

/// FIX field separator (SOH).
const SOH: u8 = 0x01;

/// Anything capable of producing records from a byte stream.
pub trait FeedDecoder {
    /// Parses one message from the front of `data` into `event`.
    ///
    /// Returns the number of bytes consumed, or 0 when the message is
    /// still incomplete.
    fn parse(&mut self, data: &[u8], event: &mut MarketEvent) -> usize;

    /// Decoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Simplified FIX tag=value decoder.
///
/// Message boundary is the checksum field `10=…<SOH>`; the tags read are
/// 35 (msg type), 55 (symbol), 44 (price), 38 (quantity), 34 (sequence).
pub struct FixDecoder {
    venue_id: u32,
}

impl FixDecoder {
    pub fn new(venue_id: u32) -> Self {
        Self { venue_id }
    }

    /// Payload of the first `tag=` field in `msg`, if present.
    fn field<'a>(msg: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
        msg.split(|&b| b == SOH)
            .find_map(|field| field.strip_prefix(tag))
    }
}

impl FeedDecoder for FixDecoder {
    fn parse(&mut self, data: &[u8], event: &mut MarketEvent) -> usize {
        // Smaller than any complete message worth scanning.
        if data.len() < 20 {
            return 0;
        }

        let Some(checksum) = find(data, b"\x0110=") else {
            return 0;
        };
        let Some(terminator) = data[checksum + 1..].iter().position(|&b| b == SOH) else {
            return 0;
        };
        let end = checksum + 1 + terminator + 1;
        let msg = &data[..end];

        event.venue_id = self.venue_id;
        event.receive_timestamp = clock::now_cycles();

        event.event_type = match Self::field(msg, b"35=").and_then(|v| v.first()) {
            Some(b'D') => EventType::Trade,
            Some(b'W') => EventType::BookUpdate,
            Some(b'0') => EventType::Heartbeat,
            _ => EventType::Unknown,
        };

        if let Some(symbol) = Self::field(msg, b"55=") {
            let mut tag = [0u8; 8];
            let n = symbol.len().min(8);
            tag[..n].copy_from_slice(&symbol[..n]);
            event.symbol = Symbol(tag);
        }
        if let Some(price) = Self::field(msg, b"44=") {
            event.price = parse_fixed(price);
        }
        if let Some(quantity) = Self::field(msg, b"38=") {
            event.quantity = parse_fixed(quantity);
        }
        if let Some(seq) = Self::field(msg, b"34=") {
            event.sequence_number = parse_int(seq).max(0) as u64;
        }

        end
    }

    fn name(&self) -> &'static str {
        "FIX"
    }
}

/// Length-prefixed binary decoder: `(length: u16 le, type: u8, reserved:
/// u8)` header followed by the body.
pub struct BinaryDecoder {
    venue_id: u32,
}

impl BinaryDecoder {
    pub const HEADER_LEN: usize = 4;

    pub fn new(venue_id: u32) -> Self {
        Self { venue_id }
    }
}

impl FeedDecoder for BinaryDecoder {
    fn parse(&mut self, data: &[u8], event: &mut MarketEvent) -> usize {
        if data.len() < Self::HEADER_LEN {
            return 0;
        }

        let length = u16::from_le_bytes([data[0], data[1]]) as usize;
        if length < Self::HEADER_LEN || data.len() < length {
            return 0;
        }

        event.venue_id = self.venue_id;
        event.receive_timestamp = clock::now_cycles();
        event.event_type = match data[2] {
            1 => EventType::Trade,
            2 => EventType::Quote,
            3 => EventType::BookUpdate,
            4 => EventType::Heartbeat,
            5 => EventType::GapDetected,
            6 => EventType::ConnectionStatus,
            _ => EventType::Unknown,
        };

        length
    }

    fn name(&self) -> &'static str {
        "Binary"
    }
}

/// First position of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parses a decimal number into 10^8 fixed point. Digits stop at the
/// first non-numeric byte; at most eight fractional digits are kept.
fn parse_fixed(bytes: &[u8]) -> i64 {
    let (sign, bytes) = match bytes.first() {
        Some(b'-') => (-1, &bytes[1..]),
        _ => (1, bytes),
    };

    let mut integer = 0i64;
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        integer = integer * 10 + (bytes[i] - b'0') as i64;
        i += 1;
    }

    let mut fraction = 0i64;
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        let mut digits = 0;
        while i < bytes.len() && bytes[i].is_ascii_digit() && digits < 8 {
            fraction = fraction * 10 + (bytes[i] - b'0') as i64;
            i += 1;
            digits += 1;
        }
        for _ in digits..8 {
            fraction *= 10;
        }
    }

    sign * (integer * PRICE_SCALE + fraction)
}

/// Parses a plain integer, stopping at the first non-digit.
fn parse_int(bytes: &[u8]) -> i64 {
    let (sign, bytes) = match bytes.first() {
        Some(b'-') => (-1, &bytes[1..]),
        _ => (1, bytes),
    };

    let mut value = 0i64;
    for &b in bytes {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + (b - b'0') as i64;
    }
    sign * value
}
