//! Orders registry: an append-only index of ledger addresses, and the store
//! hosting every ledger it created.
//!
//! Each registry owns sled trees named after its address:
//! `orders` (big endian index -> ledger address), `ledgers` (address -> CBOR
//! encoded [`OrderLedger`]), `counters` (the order count), and `history` and
//! `locations` (address ‖ big endian index -> one CBOR record). The record
//! trees let a single entry be read without decoding the whole ledger.
//! Every mutating call runs as one sled transaction, so a rejected call
//! leaves no trace.
use super::access::{OWNER_SLOTS, RoleBook};
use super::error::LedgerError;
use super::ledger::{Action, OrderLedger};
use super::types::{Address, Bytes32, HistoryRecord, Location, Meta, OrderState, TimeStamp};
use super::utils;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};

const AMOUNT_KEY: &[u8] = b"amount";

#[derive(Clone)]
pub struct Registry {
    address: Address,
    roles: RoleBook,
    orders: sled::Tree,
    ledgers: sled::Tree,
    counters: sled::Tree,
    history_log: sled::Tree,
    location_log: sled::Tree,
}

fn abort(e: impl Into<LedgerError>) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(e.into())
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LedgerError> {
    minicbor::to_vec(value).map_err(|e| LedgerError::Encoding(e.to_string()))
}

fn record_key(order: &Address, index: u64) -> Vec<u8> {
    let mut key = order.as_bytes().to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn decode_count(raw: Option<sled::IVec>) -> Result<u64, LedgerError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    let bytes: [u8; 8] = raw[..]
        .try_into()
        .map_err(|_| minicbor::decode::Error::message("registry count is not 8 bytes"))?;

    Ok(u64::from_be_bytes(bytes))
}

impl Registry {
    pub fn open(db: &sled::Db, address: Address, roles: RoleBook) -> Result<Self, LedgerError> {
        let orders = db.open_tree(format!("{address}/orders"))?;
        let ledgers = db.open_tree(format!("{address}/ledgers"))?;
        let counters = db.open_tree(format!("{address}/counters"))?;
        let history_log = db.open_tree(format!("{address}/history"))?;
        let location_log = db.open_tree(format!("{address}/locations"))?;

        Ok(Self {
            address,
            roles,
            orders,
            ledgers,
            counters,
            history_log,
            location_log,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn roles(&self) -> &RoleBook {
        &self.roles
    }

    /// Build a new ledger, index it and bump the count, all or nothing.
    pub fn create(
        &self,
        product: Bytes32,
        amount: u64,
        creator: &Address,
    ) -> Result<Address, LedgerError> {
        let created = (&self.orders, &self.ledgers, &self.counters).transaction(
            |(orders, ledgers, counters)| -> ConflictableTransactionResult<Address, LedgerError> {
                let count = decode_count(counters.get(AMOUNT_KEY)?).map_err(abort)?;

                let id = utils::derive_ledger_address(self.address.as_str(), count)
                    .map_err(|e| abort(LedgerError::Encoding(e.to_string())))?;
                let id = Address::parse(&id).map_err(abort)?;

                let ledger = OrderLedger::new(
                    id.clone(),
                    product,
                    amount,
                    creator.clone(),
                    self.roles.clone(),
                );

                ledgers.insert(id.as_bytes(), encode(&ledger).map_err(abort)?)?;
                orders.insert(&count.to_be_bytes(), id.as_bytes())?;
                counters.insert(AMOUNT_KEY, (count + 1).to_be_bytes().to_vec())?;

                Ok(id)
            },
        )?;

        tracing::debug!(registry = %self.address, order = %created, %creator, "order created");
        Ok(created)
    }

    /// Number of orders recorded so far.
    pub fn amount(&self) -> Result<u64, LedgerError> {
        decode_count(self.counters.get(AMOUNT_KEY)?)
    }

    pub fn orders(&self, index: u64) -> Result<Address, LedgerError> {
        let count = self.amount()?;
        let out_of_range = LedgerError::IndexOutOfRange { index, count };
        if index >= count {
            return Err(out_of_range);
        }

        let raw = self.orders.get(index.to_be_bytes())?.ok_or(out_of_range)?;
        let address = String::from_utf8(raw.to_vec())
            .map_err(|_| minicbor::decode::Error::message("ledger address is not utf-8"))?;

        Address::parse(&address)
    }

    /// Snapshot of one ledger.
    pub fn ledger(&self, order: &Address) -> Result<OrderLedger, LedgerError> {
        let raw = self
            .ledgers
            .get(order.as_bytes())?
            .ok_or_else(|| LedgerError::UnknownOrder(order.clone()))?;

        Ok(minicbor::decode(&raw)?)
    }

    pub fn meta(&self, order: &Address) -> Result<Meta, LedgerError> {
        Ok(self.ledger(order)?.meta().clone())
    }

    pub fn state(&self, order: &Address) -> Result<OrderState, LedgerError> {
        Ok(self.ledger(order)?.state())
    }

    pub fn history_length(&self, order: &Address) -> Result<u64, LedgerError> {
        Ok(self.ledger(order)?.history_length())
    }

    pub fn history(&self, order: &Address, index: u64) -> Result<HistoryRecord, LedgerError> {
        match self.history_log.get(record_key(order, index))? {
            Some(raw) => Ok(minicbor::decode(&raw)?),
            // unknown order or out of range; the ledger reports which
            None => self.ledger(order)?.history_record(index).cloned(),
        }
    }

    pub fn location_length(&self, order: &Address) -> Result<u64, LedgerError> {
        Ok(self.ledger(order)?.location_length())
    }

    pub fn location(&self, order: &Address, index: u64) -> Result<Location, LedgerError> {
        match self.location_log.get(record_key(order, index))? {
            Some(raw) => Ok(minicbor::decode(&raw)?),
            None => self.ledger(order)?.location(index).cloned(),
        }
    }

    /// Run a lifecycle transition against a stored ledger.
    pub fn apply(&self, order: &Address, action: Action, caller: &Address) -> Result<(), LedgerError> {
        let now = TimeStamp::new();
        self.mutate(order, |ledger| ledger.apply(action, caller, now.clone()))
    }

    pub fn set_owners(
        &self,
        order: &Address,
        owners: [Address; OWNER_SLOTS],
        caller: &Address,
    ) -> Result<(), LedgerError> {
        self.mutate(order, |ledger| {
            ledger.set_owners(owners.clone(), caller);
            Ok(())
        })
    }

    pub fn update_location(
        &self,
        order: &Address,
        latitude: Bytes32,
        longitude: Bytes32,
        caller: &Address,
    ) -> Result<(), LedgerError> {
        self.mutate(order, |ledger| ledger.update_location(latitude, longitude, caller))
    }

    // check-then-mutate inside a single transaction. `f` can run more than
    // once if sled retries on conflict, so it must not have side effects.
    // Records appended by `f` are mirrored into the record trees.
    fn mutate<T>(
        &self,
        order: &Address,
        f: impl Fn(&mut OrderLedger) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let key = order.as_bytes();

        let out = (&self.ledgers, &self.history_log, &self.location_log).transaction(
            |(ledgers, history_log, location_log)| -> ConflictableTransactionResult<T, LedgerError> {
                let raw = ledgers
                    .get(key)?
                    .ok_or_else(|| abort(LedgerError::UnknownOrder(order.clone())))?;
                let mut ledger: OrderLedger = minicbor::decode(&raw).map_err(abort)?;
                let (history_from, locations_from) =
                    (ledger.history_length(), ledger.location_length());

                let out = f(&mut ledger).map_err(abort)?;

                for index in history_from..ledger.history_length() {
                    let record = ledger.history_record(index).map_err(abort)?;
                    history_log.insert(record_key(order, index), encode(record).map_err(abort)?)?;
                }
                for index in locations_from..ledger.location_length() {
                    let record = ledger.location(index).map_err(abort)?;
                    location_log.insert(record_key(order, index), encode(record).map_err(abort)?)?;
                }

                ledgers.insert(key, encode(&ledger).map_err(abort)?)?;
                Ok(out)
            },
        )?;

        Ok(out)
    }
}
