//! Target Resolver
//!
//! Maps the literal part of a target expression to concrete series keys.
//! The text is split on top-level semicolons and each token is tried, in
//! order, as:
//!
//! 1. a `FILTER ...` / `SELECT ...` clause evaluated against the catalog
//! 2. an encoded series key (`SOURCE:NUMBER`, e.g. `PPA:1`)
//! 3. a signal GUID
//! 4. a point tag
//!
//! The first form that applies wins. A token may be prefixed with
//! `alias = ` to name its series explicitly; aliased entries replace
//! implicit ones for the same key, while an implicit resolution never
//! replaces an existing entry.

use crate::cache::TargetCaches;
use crate::config::QueryConfig;
use crate::query::catalog::{equals_predicate, MetadataCatalog, MetadataRow};
use crate::query::error::QueryResult;
use crate::query::parser::{parse_filter_clause, split_targets};
use crate::types::SeriesKey;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref ALIASED_TARGET: Regex =
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+?)\s*$").expect("valid regex");
    static ref ENCODED_KEY: Regex =
        Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*:\d+$").expect("valid regex");
}

// ============================================================================
// Target Map
// ============================================================================

/// Ordered, de-duplicated mapping of series key to display name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetMap {
    entries: Vec<(SeriesKey, String)>,
    index: HashMap<SeriesKey, usize>,
    aliased: Vec<bool>,
    aliases: HashMap<String, SeriesKey>,
}

impl TargetMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an implicit resolution; ignored when the key is already present
    pub fn insert(&mut self, key: SeriesKey, display_name: impl Into<String>) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.push(key, display_name.into(), false);
        true
    }

    /// Add an aliased resolution; replaces an implicit entry for the same key
    pub fn insert_aliased(
        &mut self,
        key: SeriesKey,
        alias: &str,
        display_name: impl Into<String>,
    ) -> bool {
        self.aliases
            .entry(alias.to_ascii_lowercase())
            .or_insert_with(|| key.clone());

        match self.index.get(&key).copied() {
            Some(i) if self.aliased[i] => false,
            Some(i) => {
                self.entries[i].1 = display_name.into();
                self.aliased[i] = true;
                true
            }
            None => {
                self.push(key, display_name.into(), true);
                true
            }
        }
    }

    fn push(&mut self, key: SeriesKey, display_name: String, aliased: bool) {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, display_name));
        self.aliased.push(aliased);
    }

    /// Entries in resolution order
    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Resolved keys in resolution order
    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Display name for a key
    pub fn display_name(&self, key: &SeriesKey) -> Option<&str> {
        self.index.get(key).map(|&i| self.entries[i].1.as_str())
    }

    /// True when the key's display name came from an alias
    pub fn is_aliased(&self, key: &SeriesKey) -> bool {
        self.index.get(key).is_some_and(|&i| self.aliased[i])
    }

    /// Key named by an alias (case-insensitive)
    pub fn alias_target(&self, alias: &str) -> Option<&SeriesKey> {
        self.aliases.get(&alias.trim().to_ascii_lowercase())
    }

    /// Aliases defined while resolving
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &SeriesKey)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing resolved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Catalog field names and default table used during resolution
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Table used for key, GUID, tag and label lookups
    pub table: String,
    /// Field holding the series key
    pub key_field: String,
    /// Field holding the point tag
    pub tag_field: String,
    /// Field holding the signal GUID
    pub signal_id_field: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&QueryConfig::default())
    }
}

impl From<&QueryConfig> for ResolverConfig {
    fn from(config: &QueryConfig) -> Self {
        Self {
            table: config.default_metadata_table.clone(),
            key_field: config.key_field.clone(),
            tag_field: config.tag_field.clone(),
            signal_id_field: config.signal_id_field.clone(),
        }
    }
}

/// Resolves literal target text into series keys
pub struct TargetResolver {
    catalog: Arc<dyn MetadataCatalog>,
    caches: Arc<TargetCaches>,
    config: ResolverConfig,
}

impl TargetResolver {
    /// Create a resolver over a catalog and shared caches
    pub fn new(
        catalog: Arc<dyn MetadataCatalog>,
        caches: Arc<TargetCaches>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            catalog,
            caches,
            config,
        }
    }

    /// Catalog backing this resolver
    pub fn catalog(&self) -> &Arc<dyn MetadataCatalog> {
        &self.catalog
    }

    /// Resolver settings
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a semicolon-separated target list
    ///
    /// Unresolvable tokens are logged and skipped. Malformed FILTER clauses
    /// and catalog failures are returned as errors.
    pub fn resolve(&self, expression: &str) -> QueryResult<Arc<TargetMap>> {
        let key = (self.config.table.clone(), expression.trim().to_string());
        self.caches
            .targets
            .try_get_or_insert_with(key, || self.resolve_uncached(expression).map(Arc::new))
    }

    fn resolve_uncached(&self, expression: &str) -> QueryResult<TargetMap> {
        let mut map = TargetMap::new();

        for token in split_targets(expression) {
            let (alias, target) = match ALIASED_TARGET.captures(&token) {
                Some(caps) if parse_filter_clause(&token).is_none() => (
                    caps.get(1).map(|m| m.as_str().to_string()),
                    caps.get(2).map_or(token.as_str(), |m| m.as_str()).to_string(),
                ),
                _ => (None, token.clone()),
            };

            let resolved = self.resolve_token(&target)?;
            if resolved.is_empty() {
                warn!(target = %target, "target did not resolve to any series");
                continue;
            }

            for (key, display) in resolved {
                match &alias {
                    Some(alias) => {
                        map.insert_aliased(key, alias, format!("{} = {}", alias, display));
                    }
                    None => {
                        map.insert(key, display);
                    }
                }
            }
        }

        debug!(expression = %expression.trim(), series = map.len(), "resolved targets");
        Ok(map)
    }

    /// Resolve one token (alias already removed)
    fn resolve_token(&self, token: &str) -> QueryResult<Vec<(SeriesKey, String)>> {
        if let Some(clause) = parse_filter_clause(token) {
            let clause = clause?;
            let rows = self.catalog.select_rows(
                &clause.table,
                &clause.predicate,
                clause.order_by.as_deref(),
                clause.descending,
                clause.take,
            )?;
            return Ok(rows.iter().filter_map(|row| self.row_target(row)).collect());
        }

        if ENCODED_KEY.is_match(token) {
            let display = self
                .lookup_by(&self.config.key_field, token)
                .and_then(|row| row.get(&self.config.tag_field).map(String::from))
                .unwrap_or_else(|| token.to_string());
            return Ok(vec![(SeriesKey::new(token), display)]);
        }

        let guid_text = token.trim_start_matches('{').trim_end_matches('}');
        if let Ok(guid) = uuid::Uuid::parse_str(guid_text) {
            return Ok(self
                .lookup_by(&self.config.signal_id_field, &guid.to_string())
                .and_then(|row| self.row_target(&row))
                .into_iter()
                .collect());
        }

        Ok(self
            .lookup_by(&self.config.tag_field, token)
            .and_then(|row| self.row_target(&row))
            .into_iter()
            .collect())
    }

    /// Key and display name carried by a catalog row
    fn row_target(&self, row: &MetadataRow) -> Option<(SeriesKey, String)> {
        let key = row.get(&self.config.key_field).filter(|k| !k.is_empty())?;
        let display = row
            .get(&self.config.tag_field)
            .filter(|t| !t.is_empty())
            .unwrap_or(key);
        Some((SeriesKey::new(key), display.to_string()))
    }

    /// Single-row lookup on the default table, warning on duplicates
    fn lookup_by(&self, field: &str, value: &str) -> Option<MetadataRow> {
        if !self.catalog.has_table(&self.config.table) {
            return None;
        }

        let predicate = equals_predicate(field, value);
        match self
            .catalog
            .select_rows(&self.config.table, &predicate, None, false, Some(2))
        {
            Ok(rows) => {
                if rows.len() > 1 {
                    warn!(field, value, "duplicate metadata rows, using the first match");
                }
                rows.into_iter().next()
            }
            Err(e) => {
                warn!(field, value, error = %e, "metadata lookup failed");
                None
            }
        }
    }

    /// Catalog row describing a series, matched by point tag then key
    ///
    /// `table` overrides the default metadata table.
    pub fn lookup_metadata(&self, table: Option<&str>, target: &str) -> Option<MetadataRow> {
        let table = table.unwrap_or(&self.config.table);
        if !self.catalog.has_table(table) {
            return None;
        }

        [&self.config.tag_field, &self.config.key_field]
            .into_iter()
            .find_map(|field| {
                self.catalog
                    .lookup_row(table, &equals_predicate(field, target.trim()))
                    .ok()
                    .flatten()
            })
    }
}
