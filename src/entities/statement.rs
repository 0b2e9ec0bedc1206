// 📄 Statement Entity - account balance as of a date

use crate::entities::{Account, Asset};
use crate::error::{RecordError, Result};
use crate::record::{Entity, Handle, Linkable, Owned, RecordMeta, RefField, Taggable};
use crate::schema::EntityKind;
use crate::session::Session;
use crate::value::{RowReader, RowWriter};
use chrono::NaiveDate;

const NAME: &str = "Statement";

#[derive(Debug, Clone)]
pub struct Statement {
    meta: RecordMeta,
    date: Option<NaiveDate>,
    account: RefField<Account>,
    balance: Option<f64>,
    unit: RefField<Asset>,
    description: Option<String>,
}

impl Statement {
    pub fn new(
        date: NaiveDate,
        account: Handle<Account>,
        balance: f64,
        unit: Handle<Asset>,
    ) -> Self {
        Statement {
            meta: RecordMeta::unsaved(),
            date: Some(date),
            account: RefField::from_handle(NAME, "account", account),
            balance: Some(balance),
            unit: RefField::from_handle(NAME, "unit", unit),
            description: None,
        }
    }

    pub fn date(&self) -> Result<NaiveDate> {
        self.date.ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "date",
        })
    }

    pub fn account(&self) -> &RefField<Account> {
        &self.account
    }

    pub fn balance(&self) -> Result<f64> {
        self.balance.ok_or(RecordError::FieldUnset {
            entity: NAME,
            field: "balance",
        })
    }

    pub fn unit(&self) -> &RefField<Asset> {
        &self.unit
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_date(&mut self, date: NaiveDate) -> Result<()> {
        self.meta.ensure_mutable(NAME, "date")?;
        self.date = Some(date);
        Ok(())
    }

    pub fn set_account(&mut self, account: Handle<Account>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "account")?;
        self.account = RefField::from_handle(NAME, "account", account);
        Ok(())
    }

    pub fn set_balance(&mut self, balance: f64) -> Result<()> {
        self.meta.ensure_mutable(NAME, "balance")?;
        self.balance = Some(balance);
        Ok(())
    }

    pub fn set_unit(&mut self, unit: Handle<Asset>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "unit")?;
        self.unit = RefField::from_handle(NAME, "unit", unit);
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> Result<()> {
        self.meta.ensure_mutable(NAME, "description")?;
        self.description = Some(description.into());
        Ok(())
    }

    /// `account balance unit @ date`
    pub fn label(&self, session: &mut Session) -> Result<String> {
        Ok(format!(
            "{} {} {} @ {}",
            session.name_of(&self.account)?,
            self.balance()?,
            session.name_of(&self.unit)?,
            self.date()?
        ))
    }
}

impl Entity for Statement {
    const KIND: EntityKind = EntityKind::Statement;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn encode(&self, row: &mut RowWriter) -> Result<()> {
        row.put("date", self.date);
        row.put("account", self.account.key());
        row.put("balance", self.balance);
        row.put("unit", self.unit.key());
        row.put("description", self.description.clone());
        Ok(())
    }

    fn decode(row: &RowReader) -> Result<Self> {
        Ok(Statement {
            meta: RecordMeta::stored(row.key(), row.report()),
            date: row.date("date")?,
            account: RefField::from_key(NAME, "account", row.key_ref("account")?),
            balance: row.real("balance")?,
            unit: RefField::from_key(NAME, "unit", row.key_ref("unit")?),
            description: row.text("description")?,
        })
    }
}

impl Owned for Statement {}

impl Taggable for Statement {}

impl Linkable for Statement {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_encode_uses_keys() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let mut statement = Statement::new(date, Handle::new(0, 3), 1200.5, Handle::new(1, 1));
        statement.set_description("January close").unwrap();

        let mut row = RowWriter::new(NAME);
        statement.encode(&mut row).unwrap();
        assert_eq!(row.take("account"), Some(crate::value::Value::Integer(3)));
        assert_eq!(row.take("unit"), Some(crate::value::Value::Integer(1)));
        assert_eq!(row.take("balance"), Some(crate::value::Value::Real(1200.5)));
        assert!(statement.account().is_resolved());
    }

    #[test]
    fn test_decoded_reference_is_lazy() {
        let mut values = std::collections::HashMap::new();
        values.insert("date", crate::value::Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        values.insert("account", crate::value::Value::Integer(8));
        values.insert("balance", crate::value::Value::Real(10.0));
        values.insert("unit", crate::value::Value::Integer(2));
        let statement = Statement::decode(&RowReader::new(NAME, 4, Some(1), values)).unwrap();

        assert_eq!(statement.account().key(), Some(8));
        assert!(!statement.account().is_resolved());
        assert_eq!(statement.meta().report(), Some(1));
    }

    #[test]
    fn test_label_resolves_names() {
        use crate::entities::Report;
        let mut session = Session::open_in_memory().unwrap();
        let report = session.create_report(Report::new("setup")).unwrap();
        let checking = session.write(Account::new("checking", "bank", "me"), report).unwrap();
        let usd = session.write(Asset::new("usd", "currency"), report).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let handle = session.write(Statement::new(date, checking, 250.0, usd), report).unwrap();

        session.clear_all_caches();
        let statement = session.get(handle).unwrap();
        assert_eq!(statement.label(&mut session).unwrap(), "checking 250 usd @ 2024-01-31");
    }
}
