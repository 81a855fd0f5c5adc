//! Fixed-layout market records
//!
//! Every record is `#[repr(C)]` plain-old-data with explicit padding, so the
//! bytes in a memory-mapped store are exactly the in-memory value and the
//! record size doubles as the schema version. Timestamps are epoch
//! milliseconds (UTC) as delivered by the exchange feed.

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

use crate::errors::RecordError;
use crate::ids::{StrategyId, SymbolCode};

/// Order-book depth carried by a tick.
pub const BOOK_DEPTH: usize = 5;

/// Instrument-type discriminator stored in the `kind` field of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i8)]
pub enum InstrumentType {
    Unknown = -1,
    Index = 0,
    Stock = 1,
}

impl InstrumentType {
    pub fn as_i8(self) -> i8 {
        self as i8
    }
}

impl TryFrom<i8> for InstrumentType {
    type Error = RecordError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unknown),
            0 => Ok(Self::Index),
            1 => Ok(Self::Stock),
            other => Err(RecordError::UnknownInstrumentType(other)),
        }
    }
}

/// Top-of-book subset carried from the last contributing record into a bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Quote {
    pub ask_price_1: f32,
    pub bid_price_1: f32,
    pub ask_vol_1: u32,
    pub bid_vol_1: u32,
    pub ask_vol_2: u32,
    pub bid_vol_2: u32,
}

/// A single market-data update for one symbol.
///
/// `amount` and `volume` are cumulative for the trading day; `open`, `high`
/// and `low` are the exchange's running day values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize)]
#[repr(C)]
pub struct Tick {
    pub code: SymbolCode,
    /// Local receipt time.
    pub now: u64,
    /// Exchange time.
    pub time: u64,
    pub amount: f64,
    pub volume: u64,
    pub last_price: f32,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub last_close: f32,
    pub ask_price: [f32; BOOK_DEPTH],
    pub bid_price: [f32; BOOK_DEPTH],
    pub ask_vol: [u32; BOOK_DEPTH],
    pub bid_vol: [u32; BOOK_DEPTH],
    pub kind: i8,
    #[serde(skip)]
    pub _pad: [u8; 3],
}

impl Tick {
    /// A tick with the identifying fields set and everything else zeroed.
    pub fn new(code: SymbolCode, time: u64, last_price: f32) -> Self {
        Self {
            code,
            now: time,
            time,
            last_price,
            ..Self::zeroed()
        }
    }

    pub fn instrument_type(&self) -> Result<InstrumentType, RecordError> {
        InstrumentType::try_from(self.kind)
    }

    pub fn quote(&self) -> Quote {
        Quote {
            ask_price_1: self.ask_price[0],
            bid_price_1: self.bid_price[0],
            ask_vol_1: self.ask_vol[0],
            bid_vol_1: self.bid_vol[0],
            ask_vol_2: self.ask_vol[1],
            bid_vol_2: self.bid_vol[1],
        }
    }
}

/// An aggregate over one time bucket for one symbol.
///
/// `amount` and `volume` are per-bucket deltas, never cumulative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize)]
#[repr(C)]
pub struct Bar {
    pub code: SymbolCode,
    /// Bucket label (bucket start).
    pub time: u64,
    /// Time of the first contributing record.
    pub open_dt: u64,
    /// Time of the last contributing record.
    pub close_dt: u64,
    pub amount: f64,
    pub volume: u64,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    pub pre_close: f32,
    pub ask_price_1: f32,
    pub bid_price_1: f32,
    pub ask_vol_1: u32,
    pub bid_vol_1: u32,
    pub ask_vol_2: u32,
    pub bid_vol_2: u32,
    pub kind: i8,
    #[serde(skip)]
    pub _pad: [u8; 3],
}

impl Bar {
    pub fn instrument_type(&self) -> Result<InstrumentType, RecordError> {
        InstrumentType::try_from(self.kind)
    }

    pub fn quote(&self) -> Quote {
        Quote {
            ask_price_1: self.ask_price_1,
            bid_price_1: self.bid_price_1,
            ask_vol_1: self.ask_vol_1,
            bid_vol_1: self.bid_vol_1,
            ask_vol_2: self.ask_vol_2,
            bid_vol_2: self.bid_vol_2,
        }
    }

    pub fn set_quote(&mut self, quote: &Quote) {
        self.ask_price_1 = quote.ask_price_1;
        self.bid_price_1 = quote.bid_price_1;
        self.ask_vol_1 = quote.ask_vol_1;
        self.bid_vol_1 = quote.bid_vol_1;
        self.ask_vol_2 = quote.ask_vol_2;
        self.bid_vol_2 = quote.bid_vol_2;
    }

    /// Check OHLC ordering.
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.close_dt >= self.open_dt
    }
}

/// A strategy output persisted with bar-like bucketing.
///
/// Three typed payload slots let strategies record arbitrary outputs without
/// changing the record layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize)]
#[repr(C)]
pub struct Signal {
    pub code: SymbolCode,
    pub time: u64,
    pub open_dt: u64,
    pub close_dt: u64,
    pub value_f32: f32,
    pub value_i32: i32,
    pub strategy_id: StrategyId,
    /// Boolean payload; 0 is false, anything else true.
    pub flag: u8,
    #[serde(skip)]
    pub _pad: [u8; 5],
}

impl Signal {
    pub fn new(code: SymbolCode, strategy_id: StrategyId, time: u64) -> Self {
        Self {
            code,
            strategy_id,
            time,
            ..Self::zeroed()
        }
    }

    pub fn flag(&self) -> bool {
        self.flag != 0
    }

    pub fn set_flag(&mut self, flag: bool) {
        self.flag = u8::from(flag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    fn code(s: &str) -> SymbolCode {
        SymbolCode::new(s).unwrap()
    }

    #[test]
    fn test_record_sizes_are_stable() {
        assert_eq!(size_of::<Tick>(), 152);
        assert_eq!(size_of::<Bar>(), 104);
        assert_eq!(size_of::<Signal>(), 56);
    }

    #[test]
    fn test_record_sizes_are_word_aligned() {
        assert_eq!(size_of::<Tick>() % 8, 0);
        assert_eq!(size_of::<Bar>() % 8, 0);
        assert_eq!(size_of::<Signal>() % 8, 0);
    }

    #[test]
    fn test_tick_bytes_roundtrip() {
        let mut tick = Tick::new(code("600000.SH"), 1_740_706_505_000, 10.5);
        tick.volume = 1_200;
        tick.amount = 12_600.0;
        tick.ask_price = [10.51, 10.52, 10.53, 10.54, 10.55];

        let bytes = bytemuck::bytes_of(&tick);
        let decoded: Tick = *bytemuck::from_bytes(bytes);
        assert_eq!(decoded, tick);
    }

    #[test]
    fn test_tick_quote_takes_top_levels() {
        let mut tick = Tick::new(code("600000.SH"), 0, 10.0);
        tick.ask_price[0] = 10.01;
        tick.bid_price[0] = 9.99;
        tick.ask_vol = [1, 2, 3, 4, 5];
        tick.bid_vol = [6, 7, 8, 9, 10];

        let quote = tick.quote();
        assert_eq!(quote.ask_price_1, 10.01);
        assert_eq!(quote.bid_price_1, 9.99);
        assert_eq!(quote.ask_vol_2, 2);
        assert_eq!(quote.bid_vol_2, 7);

        let mut bar = Bar::default();
        bar.set_quote(&quote);
        assert_eq!(bar.quote(), quote);
    }

    #[test]
    fn test_instrument_type_discriminator() {
        let mut tick = Tick::default();
        tick.kind = InstrumentType::Stock.as_i8();
        assert_eq!(tick.instrument_type().unwrap(), InstrumentType::Stock);

        tick.kind = 7;
        assert_eq!(
            tick.instrument_type().unwrap_err(),
            RecordError::UnknownInstrumentType(7)
        );
    }

    #[test]
    fn test_bar_validity() {
        let bar = Bar {
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            open_dt: 1,
            close_dt: 2,
            ..Bar::default()
        };
        assert!(bar.is_valid());

        let invalid = Bar { high: 9.9, ..bar };
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_signal_flag() {
        let mut signal = Signal::new(code("000001.SZ"), 3, 0);
        assert!(!signal.flag());
        signal.set_flag(true);
        assert!(signal.flag());
        assert_eq!(signal.flag, 1);
    }

    #[test]
    fn test_bar_serializes_code_as_text() {
        let bar = Bar {
            code: code("000001.SZ"),
            time: 60_000,
            ..Bar::default()
        };
        let json = serde_json::to_value(bar).unwrap();
        assert_eq!(json["code"], "000001.SZ");
        assert_eq!(json["time"], 60_000);
        assert!(json.get("_pad").is_none());
    }
}
