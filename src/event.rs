//! Fixed-layout market event record.
//!
//! [`MarketEvent`] is the unit that flows through every queue in the
//! runtime: exactly 64 bytes, 64-byte aligned, so one record occupies one
//! cache line and a slot copy is a single line transfer. The layout is
//! `repr(C)` and stable; records are plain bytes with no owning pointers,
//! which is what allows them to be value-copied across queue boundaries.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Cache line size assumed throughout the crate (x86-64 and most aarch64).
pub const CACHE_LINE_SIZE: usize = 64;

/// Fixed-point scale for prices and quantities: 1.0 is stored as 10^8.
pub const PRICE_SCALE: i64 = 100_000_000;

/// Kind of market event carried by a [`MarketEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EventType {
    #[default]
    Unknown = 0,
    Trade = 1,
    Quote = 2,
    BookUpdate = 3,
    Heartbeat = 4,
    GapDetected = 5,
    ConnectionStatus = 6,
}

/// Book side of an order or quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Side {
    #[default]
    Unknown = 0,
    Bid = 1,
    Ask = 2,
    Both = 3,
}

/// Fixed 8-byte instrument tag.
///
/// Compared and hashed as a single little-endian `u64`, so symbol equality
/// is one integer compare regardless of the tag's text length.
#[derive(Debug, Clone, Copy, Default)]
#[repr(transparent)]
pub struct Symbol(pub [u8; 8]);

impl Symbol {
    /// Builds a symbol from a string, truncating to 8 bytes and
    /// zero-padding the rest.
    pub fn new(s: &str) -> Self {
        let mut data = [0u8; 8];
        let n = s.len().min(8);
        data[..n].copy_from_slice(&s.as_bytes()[..n]);
        Self(data)
    }

    /// The tag viewed as a little-endian `u64`.
    #[inline(always)]
    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.0)
    }
}

impl PartialEq for Symbol {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.as_u64() == other.as_u64()
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.as_u64());
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(8);
        f.write_str(&String::from_utf8_lossy(&self.0[..end]))
    }
}

/// One market event, exactly one cache line.
///
/// Field order is part of the wire-visible contract; offsets are asserted
/// at compile time below.
///
/// | offset | field              |
/// |--------|--------------------|
/// | 0      | exchange_timestamp |
/// | 8      | receive_timestamp  |
/// | 16     | symbol             |
/// | 24     | sequence_number    |
/// | 32     | price              |
/// | 40     | quantity           |
/// | 48     | venue_id           |
/// | 52     | order_id           |
/// | 56     | trade_id           |
/// | 60     | event_type         |
/// | 61     | side               |
/// | 62     | book_level         |
/// | 63     | flags              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, align(64))]
pub struct MarketEvent {
    /// Nanoseconds since epoch as reported by the source.
    pub exchange_timestamp: u64,
    /// Opaque cycle count captured locally at ingress.
    pub receive_timestamp: u64,
    pub symbol: Symbol,
    /// Monotonic per-producer counter; gaps indicate loss upstream.
    pub sequence_number: u64,
    /// Fixed point, 10^8 scale.
    pub price: i64,
    /// Fixed point, 10^8 scale.
    pub quantity: i64,
    pub venue_id: u32,
    pub order_id: u32,
    pub trade_id: u32,
    pub event_type: EventType,
    pub side: Side,
    pub book_level: u8,
    pub flags: u8,
}

const _: () = assert!(size_of::<MarketEvent>() == 64, "MarketEvent must be exactly 64 bytes");
const _: () = assert!(align_of::<MarketEvent>() == 64, "MarketEvent must be 64-byte aligned");

impl MarketEvent {
    /// Convenience constructor for a trade print; used by synthetic feeds
    /// and tests.
    pub fn trade(symbol: Symbol, price: i64, quantity: i64, side: Side) -> Self {
        Self {
            symbol,
            price,
            quantity,
            side,
            event_type: EventType::Trade,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn event_is_one_cache_line() {
        assert_eq!(size_of::<MarketEvent>(), 64);
        assert_eq!(align_of::<MarketEvent>(), 64);
    }

    #[test]
    fn event_field_offsets_are_stable() {
        assert_eq!(offset_of!(MarketEvent, exchange_timestamp), 0);
        assert_eq!(offset_of!(MarketEvent, receive_timestamp), 8);
        assert_eq!(offset_of!(MarketEvent, symbol), 16);
        assert_eq!(offset_of!(MarketEvent, sequence_number), 24);
        assert_eq!(offset_of!(MarketEvent, price), 32);
        assert_eq!(offset_of!(MarketEvent, quantity), 40);
        assert_eq!(offset_of!(MarketEvent, venue_id), 48);
        assert_eq!(offset_of!(MarketEvent, order_id), 52);
        assert_eq!(offset_of!(MarketEvent, trade_id), 56);
        assert_eq!(offset_of!(MarketEvent, event_type), 60);
        assert_eq!(offset_of!(MarketEvent, side), 61);
        assert_eq!(offset_of!(MarketEvent, book_level), 62);
        assert_eq!(offset_of!(MarketEvent, flags), 63);
    }

    #[test]
    fn symbol_compares_as_u64() {
        let a = Symbol::new("AAPL");
        let b = Symbol::new("AAPL");
        let c = Symbol::new("MSFT");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_u64(), b.as_u64());
    }

    #[test]
    fn symbol_truncates_long_tags() {
        let s = Symbol::new("VERYLONGNAME");
        assert_eq!(s, Symbol::new("VERYLONG"));
        assert_eq!(s.to_string(), "VERYLONG");
    }

    #[test]
    fn symbol_hashes_like_its_u64_view() {
        use std::collections::hash_map::DefaultHasher;

        let mut h1 = DefaultHasher::new();
        Symbol::new("EURUSD").hash(&mut h1);
        let mut h2 = DefaultHasher::new();
        h2.write_u64(Symbol::new("EURUSD").as_u64());
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn copies_are_bitwise_identical() {
        let mut ev = MarketEvent::trade(Symbol::new("AAPL"), 150 * PRICE_SCALE, 100 * PRICE_SCALE, Side::Bid);
        ev.exchange_timestamp = 0x1122_3344_5566_7788;
        ev.receive_timestamp = 42;
        ev.sequence_number = 7;
        ev.venue_id = 1;
        ev.order_id = 2;
        ev.trade_id = 3;
        ev.book_level = 4;
        ev.flags = 0x80;

        let copy = ev;
        let lhs: [u8; 64] = unsafe { std::mem::transmute(ev) };
        let rhs: [u8; 64] = unsafe { std::mem::transmute(copy) };
        assert_eq!(lhs, rhs);
        assert_eq!(ev, copy);
    }

    #[test]
    fn default_event_is_unknown() {
        let ev = MarketEvent::default();
        assert_eq!(ev.event_type, EventType::Unknown);
        assert_eq!(ev.side, Side::Unknown);
        assert_eq!(ev.sequence_number, 0);
    }
}
