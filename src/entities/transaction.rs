// 💸 Transaction & Verification Entities
//
// A Transaction moves `amount` of `unit` from `sender` to `receiver`. When
// the receiver gets a different unit (currency exchange, buying a security)
// `received_amount`/`received_unit` carry the other leg; the two are always
// set together.
//
// A Verification has the same shape and independently corroborates a
// Transaction (e.g. the counterparty's statement line), optionally pointing
// at the transaction it confirms.

use crate::entities::{Account, Asset};
use crate::error::{RecordError, Result};
use crate::record::{Entity, Handle, Linkable, Owned, RecordMeta, RefField, Taggable};
use crate::schema::EntityKind;
use crate::session::Session;
use crate::value::{RowReader, RowWriter};
use chrono::NaiveDate;

// ============================================================================
// SHARED TRANSFER FIELDS
// ============================================================================

#[derive(Debug, Clone)]
pub struct TransferFields {
    date: Option<NaiveDate>,
    location: Option<String>,
    sender: RefField<Account>,
    amount: Option<f64>,
    unit: RefField<Asset>,
    receiver: RefField<Account>,
    received_amount: Option<f64>,
    received_unit: RefField<Asset>,
    description: Option<String>,
    reference: Option<String>,
}

impl TransferFields {
    fn unset(entity: &'static str) -> Self {
        TransferFields {
            date: None,
            location: None,
            sender: RefField::unset(entity, "sender"),
            amount: None,
            unit: RefField::unset(entity, "unit"),
            receiver: RefField::unset(entity, "receiver"),
            received_amount: None,
            received_unit: RefField::unset(entity, "received_unit"),
            description: None,
            reference: None,
        }
    }

    fn check_received(&self, entity: &'static str) -> Result<()> {
        if self.received_amount.is_some() != self.received_unit.is_set() {
            return Err(RecordError::invalid(
                entity,
                "received_amount and received_unit must be set together",
            ));
        }
        Ok(())
    }

    fn encode(&self, entity: &'static str, row: &mut RowWriter) -> Result<()> {
        self.check_received(entity)?;
        row.put("date", self.date);
        row.put("location", self.location.clone());
        row.put("sender", self.sender.key());
        row.put("amount", self.amount);
        row.put("unit", self.unit.key());
        row.put("receiver", self.receiver.key());
        row.put("received_amount", self.received_amount);
        row.put("received_unit", self.received_unit.key());
        row.put("description", self.description.clone());
        row.put("reference", self.reference.clone());
        Ok(())
    }

    fn decode(entity: &'static str, row: &RowReader) -> Result<Self> {
        let fields = TransferFields {
            date: row.date("date")?,
            location: row.text("location")?,
            sender: RefField::from_key(entity, "sender", row.key_ref("sender")?),
            amount: row.real("amount")?,
            unit: RefField::from_key(entity, "unit", row.key_ref("unit")?),
            receiver: RefField::from_key(entity, "receiver", row.key_ref("receiver")?),
            received_amount: row.real("received_amount")?,
            received_unit: RefField::from_key(entity, "received_unit", row.key_ref("received_unit")?),
            description: row.text("description")?,
            reference: row.text("reference")?,
        };
        fields.check_received(entity)?;
        Ok(fields)
    }
}

/// Getters and guarded setters over `self.transfer` for a transfer-shaped entity
macro_rules! transfer_accessors {
    ($ty:ident, $name:expr) => {
        impl $ty {
            pub fn date(&self) -> Result<NaiveDate> {
                self.transfer.date.ok_or(RecordError::FieldUnset {
                    entity: $name,
                    field: "date",
                })
            }

            pub fn location(&self) -> Option<&str> {
                self.transfer.location.as_deref()
            }

            pub fn sender(&self) -> &RefField<Account> {
                &self.transfer.sender
            }

            pub fn amount(&self) -> Result<f64> {
                self.transfer.amount.ok_or(RecordError::FieldUnset {
                    entity: $name,
                    field: "amount",
                })
            }

            pub fn unit(&self) -> &RefField<Asset> {
                &self.transfer.unit
            }

            pub fn receiver(&self) -> &RefField<Account> {
                &self.transfer.receiver
            }

            pub fn received_amount(&self) -> Option<f64> {
                self.transfer.received_amount
            }

            pub fn received_unit(&self) -> &RefField<Asset> {
                &self.transfer.received_unit
            }

            pub fn description(&self) -> Option<&str> {
                self.transfer.description.as_deref()
            }

            pub fn reference(&self) -> Option<&str> {
                self.transfer.reference.as_deref()
            }

            pub fn set_date(&mut self, date: NaiveDate) -> Result<()> {
                self.meta.ensure_mutable($name, "date")?;
                self.transfer.date = Some(date);
                Ok(())
            }

            pub fn set_location(&mut self, location: impl Into<String>) -> Result<()> {
                self.meta.ensure_mutable($name, "location")?;
                self.transfer.location = Some(location.into());
                Ok(())
            }

            pub fn set_sender(&mut self, sender: Handle<Account>) -> Result<()> {
                self.meta.ensure_mutable($name, "sender")?;
                self.transfer.sender = RefField::from_handle($name, "sender", sender);
                Ok(())
            }

            pub fn set_amount(&mut self, amount: f64) -> Result<()> {
                self.meta.ensure_mutable($name, "amount")?;
                self.transfer.amount = Some(amount);
                Ok(())
            }

            pub fn set_unit(&mut self, unit: Handle<Asset>) -> Result<()> {
                self.meta.ensure_mutable($name, "unit")?;
                self.transfer.unit = RefField::from_handle($name, "unit", unit);
                Ok(())
            }

            pub fn set_receiver(&mut self, receiver: Handle<Account>) -> Result<()> {
                self.meta.ensure_mutable($name, "receiver")?;
                self.transfer.receiver = RefField::from_handle($name, "receiver", receiver);
                Ok(())
            }

            /// Set the received leg of a cross-unit transfer
            pub fn set_received(&mut self, amount: f64, unit: Handle<Asset>) -> Result<()> {
                self.meta.ensure_mutable($name, "received_amount")?;
                self.transfer.received_amount = Some(amount);
                self.transfer.received_unit = RefField::from_handle($name, "received_unit", unit);
                Ok(())
            }

            pub fn clear_received(&mut self) -> Result<()> {
                self.meta.ensure_mutable($name, "received_amount")?;
                self.transfer.received_amount = None;
                self.transfer.received_unit = RefField::unset($name, "received_unit");
                Ok(())
            }

            pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
                self.meta.ensure_mutable($name, "description")?;
                self.transfer.description = Some(description.into());
                Ok(())
            }

            pub fn set_reference(&mut self, reference: impl Into<String>) -> Result<()> {
                self.meta.ensure_mutable($name, "reference")?;
                self.transfer.reference = Some(reference.into());
                Ok(())
            }

            /// `sender amount unit -> receiver`, names resolved through the session
            pub fn label(&self, session: &mut Session) -> Result<String> {
                let t = &self.transfer;
                let mut text = format!(
                    "{} {} {} -> {}",
                    session.name_of(&t.sender)?,
                    self.amount()?,
                    session.name_of(&t.unit)?,
                    session.name_of(&t.receiver)?
                );
                if let Some(received) = t.received_amount {
                    text.push_str(&format!(" ({} {})", received, session.name_of(&t.received_unit)?));
                }
                Ok(text)
            }
        }
    };
}

// ============================================================================
// TRANSACTION
// ============================================================================

const TRANSACTION: &str = "Transaction";

#[derive(Debug, Clone)]
pub struct Transaction {
    meta: RecordMeta,
    transfer: TransferFields,
}

impl Transaction {
    pub fn new(
        date: NaiveDate,
        sender: Handle<Account>,
        amount: f64,
        unit: Handle<Asset>,
        receiver: Handle<Account>,
    ) -> Self {
        let mut transfer = TransferFields::unset(TRANSACTION);
        transfer.date = Some(date);
        transfer.sender = RefField::from_handle(TRANSACTION, "sender", sender);
        transfer.amount = Some(amount);
        transfer.unit = RefField::from_handle(TRANSACTION, "unit", unit);
        transfer.receiver = RefField::from_handle(TRANSACTION, "receiver", receiver);
        Transaction {
            meta: RecordMeta::unsaved(),
            transfer,
        }
    }

    /// Empty unsaved transaction, filled in through setters (used by importers)
    pub fn draft() -> Self {
        Transaction {
            meta: RecordMeta::unsaved(),
            transfer: TransferFields::unset(TRANSACTION),
        }
    }
}

transfer_accessors!(Transaction, TRANSACTION);

impl Entity for Transaction {
    const KIND: EntityKind = EntityKind::Transaction;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn encode(&self, row: &mut RowWriter) -> Result<()> {
        self.transfer.encode(TRANSACTION, row)
    }

    fn decode(row: &RowReader) -> Result<Self> {
        Ok(Transaction {
            meta: RecordMeta::stored(row.key(), row.report()),
            transfer: TransferFields::decode(TRANSACTION, row)?,
        })
    }
}

impl Owned for Transaction {}

impl Taggable for Transaction {}

impl Linkable for Transaction {}

// ============================================================================
// VERIFICATION
// ============================================================================

const VERIFICATION: &str = "Verification";

#[derive(Debug, Clone)]
pub struct Verification {
    meta: RecordMeta,
    txn: RefField<Transaction>,
    transfer: TransferFields,
}

impl Verification {
    pub fn new(
        date: NaiveDate,
        sender: Handle<Account>,
        amount: f64,
        unit: Handle<Asset>,
        receiver: Handle<Account>,
    ) -> Self {
        let mut transfer = TransferFields::unset(VERIFICATION);
        transfer.date = Some(date);
        transfer.sender = RefField::from_handle(VERIFICATION, "sender", sender);
        transfer.amount = Some(amount);
        transfer.unit = RefField::from_handle(VERIFICATION, "unit", unit);
        transfer.receiver = RefField::from_handle(VERIFICATION, "receiver", receiver);
        Verification {
            meta: RecordMeta::unsaved(),
            txn: RefField::unset(VERIFICATION, "txn"),
            transfer,
        }
    }

    pub fn draft() -> Self {
        Verification {
            meta: RecordMeta::unsaved(),
            txn: RefField::unset(VERIFICATION, "txn"),
            transfer: TransferFields::unset(VERIFICATION),
        }
    }

    /// Unsaved verification mirroring a stored transaction and pointing at it
    pub fn corroborating(handle: Handle<Transaction>, txn: &Transaction) -> Self {
        let mut transfer = txn.transfer.clone();
        transfer.sender = RefField::from_key(VERIFICATION, "sender", txn.transfer.sender.key());
        transfer.unit = RefField::from_key(VERIFICATION, "unit", txn.transfer.unit.key());
        transfer.receiver =
            RefField::from_key(VERIFICATION, "receiver", txn.transfer.receiver.key());
        transfer.received_unit =
            RefField::from_key(VERIFICATION, "received_unit", txn.transfer.received_unit.key());
        Verification {
            meta: RecordMeta::unsaved(),
            txn: RefField::from_handle(VERIFICATION, "txn", handle),
            transfer,
        }
    }

    /// Transaction this verification confirms, if matched
    pub fn txn(&self) -> &RefField<Transaction> {
        &self.txn
    }

    pub fn set_txn(&mut self, txn: Handle<Transaction>) -> Result<()> {
        self.meta.ensure_mutable(VERIFICATION, "txn")?;
        self.txn = RefField::from_handle(VERIFICATION, "txn", txn);
        Ok(())
    }
}

transfer_accessors!(Verification, VERIFICATION);

impl Entity for Verification {
    const KIND: EntityKind = EntityKind::Verification;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn encode(&self, row: &mut RowWriter) -> Result<()> {
        row.put("txn", self.txn.key());
        self.transfer.encode(VERIFICATION, row)
    }

    fn decode(row: &RowReader) -> Result<Self> {
        Ok(Verification {
            meta: RecordMeta::stored(row.key(), row.report()),
            txn: RefField::from_key(VERIFICATION, "txn", row.key_ref("txn")?),
            transfer: TransferFields::decode(VERIFICATION, row)?,
        })
    }
}

impl Owned for Verification {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_new_transaction() {
        let txn = Transaction::new(day(1), Handle::new(0, 1), 42.5, Handle::new(1, 1), Handle::new(2, 2));
        assert_eq!(txn.amount().unwrap(), 42.5);
        assert_eq!(txn.sender().key(), Some(1));
        assert_eq!(txn.receiver().key(), Some(2));
        assert!(txn.received_amount().is_none());
        assert!(!txn.received_unit().is_set());
    }

    #[test]
    fn test_draft_reports_unset_fields() {
        let txn = Transaction::draft();
        assert!(matches!(
            txn.amount(),
            Err(RecordError::FieldUnset { field: "amount", .. })
        ));
        assert!(!txn.sender().is_set());
    }

    #[test]
    fn test_received_pair_set_together() {
        let mut txn = Transaction::new(day(2), Handle::new(0, 1), 100.0, Handle::new(1, 1), Handle::new(2, 2));
        txn.set_received(91.3, Handle::new(3, 2)).unwrap();
        let mut row = RowWriter::new(TRANSACTION);
        txn.encode(&mut row).unwrap();
        assert_eq!(row.take("received_amount"), Some(Value::Real(91.3)));
        assert_eq!(row.take("received_unit"), Some(Value::Integer(2)));

        txn.clear_received().unwrap();
        assert!(txn.received_amount().is_none());
        assert!(!txn.received_unit().is_set());
    }

    #[test]
    fn test_decode_rejects_half_received_pair() {
        let mut values = std::collections::HashMap::new();
        values.insert("date", Value::Date(day(3)));
        values.insert("sender", Value::Integer(1));
        values.insert("amount", Value::Real(5.0));
        values.insert("unit", Value::Integer(1));
        values.insert("receiver", Value::Integer(2));
        values.insert("received_amount", Value::Real(4.0));
        let result = Transaction::decode(&RowReader::new(TRANSACTION, 9, Some(1), values));
        assert!(matches!(result, Err(RecordError::InvalidRecord { .. })));
    }

    #[test]
    fn test_corroborating_verification() {
        let mut txn = Transaction::new(day(4), Handle::new(0, 1), 12.0, Handle::new(1, 1), Handle::new(2, 2));
        txn.set_reference("INV-7").unwrap();
        let verification = Verification::corroborating(Handle::new(5, 30), &txn);

        assert_eq!(verification.txn().key(), Some(30));
        assert_eq!(verification.amount().unwrap(), 12.0);
        assert_eq!(verification.reference(), Some("INV-7"));
        assert!(!verification.sender().is_resolved());

        let mut row = RowWriter::new(VERIFICATION);
        verification.encode(&mut row).unwrap();
        assert_eq!(row.len(), 11);
    }

    #[test]
    fn test_label_resolves_names() {
        use crate::entities::Report;
        let mut session = Session::open_in_memory().unwrap();
        let report = session.create_report(Report::new("setup")).unwrap();
        let cash = session.write(Account::new("cash", "wallet", "me"), report).unwrap();
        let shop = session.write(Account::new("merchant", "shop", "them"), report).unwrap();
        let usd = session.write(Asset::new("usd", "currency"), report).unwrap();
        let eur = session.write(Asset::new("eur", "currency"), report).unwrap();

        let txn = Transaction::new(day(5), cash, 42.5, usd, shop);
        assert_eq!(txn.label(&mut session).unwrap(), "cash 42.5 usd -> merchant");

        let mut exchange = Transaction::new(day(6), cash, 100.0, usd, shop);
        exchange.set_received(91.0, eur).unwrap();
        assert_eq!(exchange.label(&mut session).unwrap(), "cash 100 usd -> merchant (91 eur)");
    }
}
