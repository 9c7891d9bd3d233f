//! Core ledger value types: addresses, symbols, timestamps and log records
use super::error::LedgerError;
use super::utils;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// A bech32 encoded account or ledger address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

/// Opaque 32 byte symbol. Products and coordinates are stored this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bytes32([u8; 32]);

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrderState {
    #[n(0)]
    Ordered,
    #[n(1)]
    Approved,
    #[n(2)]
    Audited,
    #[n(3)]
    AtWarehouse,
    #[n(4)]
    WarehouseReleased,
    #[n(5)]
    InTransit,
    #[n(6)]
    Delivered,
    #[n(7)]
    Revoked,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    #[n(0)]
    pub product: Bytes32,
    #[n(1)]
    pub amount: u64,
    #[n(2)]
    pub revoked: bool,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    #[n(0)]
    pub actor: Address,
    #[n(1)]
    pub action: String, // fixed label of the transition that produced it
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Location {
    #[n(0)]
    pub latitude: Bytes32,
    #[n(1)]
    pub longitude: Bytes32,
    #[n(2)]
    pub actor: Address,
}

impl Address {
    /// Generate a fresh account address.
    pub fn new_account() -> anyhow::Result<Self> {
        Ok(Self(utils::new_uuid_to_bech32("acct")?))
    }
    /// Accepts any well formed bech32 string.
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        bech32::decode(raw).map_err(|_| LedgerError::InvalidAddress(raw.to_string()))?;
        Ok(Self(raw.to_string()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Bytes32 {
    /// Zero padded ASCII text, the way symbols are written to the ledger.
    pub fn from_text(text: &str) -> Result<Self, LedgerError> {
        let raw = text.as_bytes();
        if raw.len() > 32 {
            return Err(LedgerError::SymbolTooLong(raw.len()));
        }
        let mut buf = [0u8; 32];
        buf[..raw.len()].copy_from_slice(raw);
        Ok(Self(buf))
    }
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
    pub fn to_text(&self) -> String {
        let end = self.0.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl From<[u8; 32]> for Bytes32 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

// `Utc` itself has no ordering, so a derive would never apply.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl OrderState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
    pub fn name(self) -> &'static str {
        match self {
            Self::Ordered => "Ordered",
            Self::Approved => "Approved",
            Self::Audited => "Audited",
            Self::AtWarehouse => "AtWarehouse",
            Self::WarehouseReleased => "WarehouseReleased",
            Self::InTransit => "InTransit",
            Self::Delivered => "Delivered",
            Self::Revoked => "Revoked",
        }
    }
    /// Delivered and revoked orders accept no further transitions.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Delivered | Self::Revoked)
    }
}

impl TryFrom<u8> for OrderState {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ordered,
            1 => Self::Approved,
            2 => Self::Audited,
            3 => Self::AtWarehouse,
            4 => Self::WarehouseReleased,
            5 => Self::InTransit,
            6 => Self::Delivered,
            7 => Self::Revoked,
            other => return Err(LedgerError::UnknownState(other)),
        })
    }
}

impl<C> minicbor::Encode<C> for Address {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Address {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Address(d.str()?.to_string()))
    }
}

impl<C> minicbor::Encode<C> for Bytes32 {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Bytes32 {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let raw: [u8; 32] = d
            .bytes()?
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("symbol is not 32 bytes"))?;

        Ok(Bytes32(raw))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
