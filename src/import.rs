// 📥 CSV Import - rows → unsaved Transactions under one import Report
//
// Expected header:
//   date,location,sender,receiver,amount,unit,received_amount,received_unit,description,reference,tags
//
// Accounts and assets go through the alias resolver, tags (`;`-separated)
// are looked up by name. A row that fails to resolve is recorded and
// skipped; the rest of the file still imports.

use crate::aliases::AliasResolver;
use crate::entities::{Account, Asset, Report, Tag, Transaction};
use crate::error::{RecordError, Result};
use crate::record::{Named, Owned, Taggable};
use crate::session::{Batch, Session};
use crate::value::DATE_FORMAT;
use chrono::NaiveDate;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

// ============================================================================
// INPUT ROWS
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub date: String,
    #[serde(default)]
    pub location: Option<String>,
    pub sender: String,
    pub receiver: String,
    pub amount: f64,
    pub unit: String,
    #[serde(default)]
    pub received_amount: Option<f64>,
    #[serde(default)]
    pub received_unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

/// A row that could not be turned into a transaction (line 1 is the header)
#[derive(Debug)]
pub struct RowFailure {
    pub line: usize,
    pub error: RecordError,
}

// ============================================================================
// PLAN
// ============================================================================

#[derive(Debug)]
pub struct ImportPlan {
    pub source: String,
    /// SHA-256 of the raw file contents
    pub fingerprint: String,
    pub drafts: Vec<Transaction>,
    pub failures: Vec<RowFailure>,
}

/// Counts shown before asking for confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportPreview {
    pub new: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ImportPlan {
    pub fn rows(&self) -> usize {
        self.drafts.len() + self.failures.len()
    }

    /// Split drafts into new rows and rows already stored (by natural key)
    pub fn preview(&self, session: &mut Session) -> Result<ImportPreview> {
        let mut preview = ImportPreview {
            new: 0,
            skipped: 0,
            errors: self.failures.len(),
        };
        for draft in &self.drafts {
            match session.find_duplicate(draft)? {
                Some(_) => preview.skipped += 1,
                None => preview.new += 1,
            }
        }
        Ok(preview)
    }

    /// Batch owning every draft under a fresh "import" report
    pub fn into_batch(self) -> Result<Batch> {
        let mut report = Report::new("import");
        report.set_description(format!("{} (sha256 {})", self.source, self.fingerprint))?;
        let mut batch = Batch::new(report);
        for draft in self.drafts {
            batch.push(draft);
        }
        Ok(batch)
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Read and resolve a CSV file without writing anything
pub fn plan_file(session: &mut Session, aliases: &AliasResolver, path: &Path) -> Result<ImportPlan> {
    let bytes = std::fs::read(path)?;
    plan_csv(session, aliases, &path.display().to_string(), bytes.as_slice())
}

pub fn plan_csv<R: Read>(
    session: &mut Session,
    aliases: &AliasResolver,
    source: &str,
    mut input: R,
) -> Result<ImportPlan> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;

    let mut plan = ImportPlan {
        source: source.to_string(),
        fingerprint: fingerprint(&bytes),
        drafts: Vec::new(),
        failures: Vec::new(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes.as_slice());
    for (index, result) in reader.deserialize::<ImportRow>().enumerate() {
        let line = index + 2;
        let drafted = result
            .map_err(RecordError::from)
            .and_then(|row| draft_row(session, aliases, &row));
        match drafted {
            Ok(draft) => plan.drafts.push(draft),
            Err(error) if error.is_row_level() || matches!(error, RecordError::Csv(_)) => {
                warn!(line, %error, "skipping row");
                plan.failures.push(RowFailure { line, error });
            }
            Err(error) => return Err(error),
        }
    }

    info!(
        source,
        drafts = plan.drafts.len(),
        failures = plan.failures.len(),
        "planned import"
    );
    Ok(plan)
}

fn draft_row(session: &mut Session, aliases: &AliasResolver, row: &ImportRow) -> Result<Transaction> {
    let date = NaiveDate::parse_from_str(&row.date, DATE_FORMAT).map_err(|err| {
        RecordError::invalid("Transaction", format!("bad date {:?}: {}", row.date, err))
    })?;

    let mut txn = Transaction::new(
        date,
        aliases.find_account(&row.sender)?,
        row.amount,
        aliases.find_asset(&row.unit)?,
        aliases.find_account(&row.receiver)?,
    );

    match (row.received_amount, row.received_unit.as_deref()) {
        (Some(amount), Some(unit)) => txn.set_received(amount, aliases.find_asset(unit)?)?,
        (None, None) => {}
        _ => {
            return Err(RecordError::invalid(
                "Transaction",
                "received_amount and received_unit must be given together",
            ))
        }
    }
    if let Some(location) = &row.location {
        txn.set_location(location.as_str())?;
    }
    if let Some(description) = &row.description {
        txn.set_description(description.as_str())?;
    }
    if let Some(reference) = &row.reference {
        txn.set_reference(reference.as_str())?;
    }

    for name in row.tags.iter().flat_map(|tags| tags.split(';')) {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let tag = session.find_by_name::<Tag>(name)?;
        txn.add_tag(&tag)?;
    }
    Ok(txn)
}

// ============================================================================
// SEEDING
// ============================================================================

#[derive(Debug, Deserialize)]
struct AssetRow {
    name: String,
    category: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountRow {
    name: String,
    category: String,
    owner: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub added: usize,
    pub existing: usize,
}

/// Add assets from a `name,category,description` CSV, skipping known names
pub fn seed_assets<R: Read>(session: &mut Session, input: R) -> Result<SeedSummary> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut assets = Vec::new();
    for result in reader.deserialize::<AssetRow>() {
        let row = result?;
        let mut asset = Asset::new(row.name, row.category);
        if let Some(description) = row.description {
            asset.set_description(description)?;
        }
        assets.push(asset);
    }
    seed(session, "seed assets", assets)
}

/// Add accounts from a `name,category,owner,description` CSV, skipping known names
pub fn seed_accounts<R: Read>(session: &mut Session, input: R) -> Result<SeedSummary> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut accounts = Vec::new();
    for result in reader.deserialize::<AccountRow>() {
        let row = result?;
        let mut account = Account::new(row.name, row.category, row.owner);
        if let Some(description) = row.description {
            account.set_description(description)?;
        }
        accounts.push(account);
    }
    seed(session, "seed accounts", accounts)
}

fn seed<T: Named + Owned>(
    session: &mut Session,
    category: &str,
    entities: Vec<T>,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let mut batch = Batch::new(Report::new(category));
    let mut queued = HashSet::new();
    for entity in entities {
        let name = entity.name()?.to_string();
        if queued.contains(&name) {
            summary.existing += 1;
            continue;
        }
        match session.find_by_name::<T>(&name) {
            Ok(_) => summary.existing += 1,
            Err(RecordError::NotFound { .. }) => {
                summary.added += 1;
                queued.insert(name);
                batch.push(entity);
            }
            Err(err) => return Err(err),
        }
    }
    if !batch.is_empty() {
        session.commit(batch)?;
    }
    info!(category, added = summary.added, existing = summary.existing, "seeded");
    Ok(summary)
}
