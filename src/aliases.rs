// 🔤 Alias Resolver - free text → canonical Account / Asset
//
// Lookup order: standardized canonical name, then standardized shortcut
// (shortcut → canonical name → entity). Shortcuts come from each entity's
// built-in list (name, `category:name`) and from the alias file:
//
//   [accounts]
//   boa = "Bank of America"
//
//   [assets]
//   dollar = "usd"

use crate::entities::{Account, Asset};
use crate::error::{RecordError, Result};
use crate::record::{Handle, Named};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Characters turned into spaces before matching (`:` `<` `>` are kept for shortcuts)
const PUNCTUATION: &[char] = &[
    ',', '.', ';', '!', '?', '"', '\'', '`', '(', ')', '[', ']', '{', '}', '-', '_', '/', '\\', '*',
    '#', '&', '+', '|',
];

/// Lowercase, punctuation to spaces, whitespace collapsed and trimmed
pub fn standardize(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| if PUNCTUATION.contains(&c) { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// ALIAS FILE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasConfig {
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    #[serde(default)]
    pub assets: BTreeMap<String, String>,
}

impl AliasConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| RecordError::Config(format!("alias file: {}", err)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        AliasConfig::from_toml(&text)
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

struct AliasTable<T> {
    kind: &'static str,
    /// standardized canonical name → entity
    canonical: HashMap<String, Handle<T>>,
    /// standardized shortcut → standardized canonical name
    shortcuts: HashMap<String, String>,
}

impl<T> AliasTable<T> {
    fn new(kind: &'static str) -> Self {
        AliasTable {
            kind,
            canonical: HashMap::new(),
            shortcuts: HashMap::new(),
        }
    }

    fn register(&mut self, name: &str, handle: Handle<T>, shortcuts: Vec<String>) {
        let canonical = standardize(name);
        for shortcut in shortcuts {
            self.shortcuts.insert(standardize(&shortcut), canonical.clone());
        }
        self.canonical.insert(canonical, handle);
    }

    fn shortcut(&mut self, shortcut: &str, canonical: &str) {
        self.shortcuts.insert(standardize(shortcut), standardize(canonical));
    }

    fn find(&self, raw: &str) -> Result<Handle<T>> {
        let key = standardize(raw);
        if let Some(handle) = self.canonical.get(&key) {
            return Ok(*handle);
        }
        self.shortcuts
            .get(&key)
            .and_then(|canonical| self.canonical.get(canonical))
            .copied()
            .ok_or_else(|| RecordError::UnknownAlias {
                kind: self.kind,
                text: raw.to_string(),
            })
    }
}

pub struct AliasResolver {
    accounts: AliasTable<Account>,
    assets: AliasTable<Asset>,
}

impl Default for AliasResolver {
    fn default() -> Self {
        AliasResolver {
            accounts: AliasTable::new("Account"),
            assets: AliasTable::new("Asset"),
        }
    }
}

impl AliasResolver {
    pub fn new() -> Self {
        AliasResolver::default()
    }

    /// Register every stored account and asset with its built-in shortcuts
    pub fn from_session(session: &mut Session) -> Result<Self> {
        let mut resolver = AliasResolver::new();
        for handle in session.find_all::<Account>(&[])? {
            let account = session.get(handle)?;
            resolver.register_account(handle, &account)?;
        }
        for handle in session.find_all::<Asset>(&[])? {
            let asset = session.get(handle)?;
            resolver.register_asset(handle, &asset)?;
        }
        info!(
            accounts = resolver.accounts.canonical.len(),
            assets = resolver.assets.canonical.len(),
            "alias resolver ready"
        );
        Ok(resolver)
    }

    pub fn register_account(&mut self, handle: Handle<Account>, account: &Account) -> Result<()> {
        self.accounts.register(account.name()?, handle, account.shortcuts());
        Ok(())
    }

    pub fn register_asset(&mut self, handle: Handle<Asset>, asset: &Asset) -> Result<()> {
        self.assets.register(asset.name()?, handle, asset.shortcuts());
        Ok(())
    }

    pub fn add_account_shortcut(&mut self, shortcut: &str, canonical: &str) {
        self.accounts.shortcut(shortcut, canonical);
    }

    pub fn add_asset_shortcut(&mut self, shortcut: &str, canonical: &str) {
        self.assets.shortcut(shortcut, canonical);
    }

    /// Add the shortcut tables of an alias file
    pub fn load_config(&mut self, config: &AliasConfig) {
        for (shortcut, canonical) in &config.accounts {
            self.add_account_shortcut(shortcut, canonical);
        }
        for (shortcut, canonical) in &config.assets {
            self.add_asset_shortcut(shortcut, canonical);
        }
        debug!(
            accounts = config.accounts.len(),
            assets = config.assets.len(),
            "loaded alias shortcuts"
        );
    }

    pub fn find_account(&self, raw: &str) -> Result<Handle<Account>> {
        self.accounts.find(raw)
    }

    pub fn find_asset(&self, raw: &str) -> Result<Handle<Asset>> {
        self.assets.find(raw)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Report;

    fn resolver() -> (Session, AliasResolver) {
        let mut session = Session::open_in_memory().unwrap();
        let report = session.create_report(Report::new("setup")).unwrap();
        session
            .write(Account::new("Bank of America", "bank", "me"), report)
            .unwrap();
        session.write(Account::new("cash", "wallet", "me"), report).unwrap();
        session.write(Asset::new("usd", "currency"), report).unwrap();
        let resolver = AliasResolver::from_session(&mut session).unwrap();
        (session, resolver)
    }

    #[test]
    fn test_standardize() {
        assert_eq!(standardize("Bank Of America ,"), "bank of america");
        assert_eq!(standardize("  AMAZON.COM*MKTP   US "), "amazon com mktp us");
        assert_eq!(standardize("bank:Bank of America"), "bank:bank of america");
        assert_eq!(standardize(""), "");
    }

    #[test]
    fn test_find_account_via_shortcut() {
        let (mut session, mut resolver) = resolver();
        let config = AliasConfig::from_toml("[accounts]\nboa = \"Bank of America\"\n").unwrap();
        resolver.load_config(&config);

        let exact = resolver.find_account("Bank of America").unwrap();
        let messy = resolver.find_account("Bank Of America ,").unwrap();
        let short = resolver.find_account("BOA").unwrap();
        assert_eq!(exact, messy);
        assert_eq!(exact, short);
        assert_eq!(exact, session.find_by_name::<Account>("Bank of America").unwrap());
        println!("✅ Alias resolution test PASSED");
    }

    #[test]
    fn test_builtin_category_shortcut() {
        let (_, resolver) = resolver();
        let cash = resolver.find_account("wallet:cash").unwrap();
        assert_eq!(cash, resolver.find_account("Cash").unwrap());
        assert_eq!(
            resolver.find_asset("currency:USD").unwrap(),
            resolver.find_asset("usd").unwrap()
        );
    }

    #[test]
    fn test_unknown_alias_carries_text() {
        let (_, mut resolver) = resolver();
        resolver.add_asset_shortcut("euro", "eur");
        let err = resolver.find_account("Chase Sapphire").unwrap_err();
        assert!(matches!(
            err,
            RecordError::UnknownAlias { kind: "Account", ref text } if text == "Chase Sapphire"
        ));
        // shortcut to a canonical name with no stored entity
        assert!(resolver.find_asset("euro").is_err());
    }

    #[test]
    fn test_alias_config_sections_optional() {
        let config = AliasConfig::from_toml("[assets]\ndollar = \"usd\"\n").unwrap();
        assert!(config.accounts.is_empty());
        assert_eq!(config.assets.get("dollar").map(String::as_str), Some("usd"));
        assert!(AliasConfig::from_toml("accounts = 3").is_err());
    }
}
