// src/catalog.rs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::{fmt, fs, path::Path};
use tracing::info;

/// Stable key of a delivery location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(String);

impl BranchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A physical delivery location as known to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    /// Client-facing name printed on invoices and used as the pivot column header.
    pub display: String,
    /// Raw spellings seen in source documents.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Region summary this branch is routed to, if any.
    #[serde(default)]
    pub region: Option<String>,
}

impl Branch {
    fn new(id: &str, display: &str, aliases: &[&str], region: Option<&str>) -> Self {
        Self {
            id: BranchId::new(id),
            display: display.to_string(),
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            region: region.map(str::to_string),
        }
    }

    /// Every literal spelling that identifies this branch: id, display name and aliases.
    pub fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str())
            .chain(std::iter::once(self.display.as_str()))
            .chain(self.aliases.iter().map(String::as_str))
    }
}

/// Ordered set of branches for one client. Immutable for the duration of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchCatalog {
    #[serde(default)]
    pub branches: Vec<Branch>,
    /// Branches that receive invoice numbers first, in this order.
    #[serde(default)]
    pub priority: Vec<BranchId>,
}

impl BranchCatalog {
    pub fn new(branches: Vec<Branch>, priority: Vec<BranchId>) -> Self {
        Self { branches, priority }
    }

    pub fn get(&self, id: &BranchId) -> Option<&Branch> {
        self.branches.iter().find(|b| &b.id == id)
    }

    /// Declaration order of a branch; unknown ids sort last.
    pub fn position(&self, id: &BranchId) -> usize {
        self.branches
            .iter()
            .position(|b| &b.id == id)
            .unwrap_or(self.branches.len())
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Catalogs hard-wired for clients whose branch lists never change.
    pub fn builtin(client: &str) -> Self {
        match client {
            "breadfast" => Self::new(
                vec![
                    Branch::new("loran", "لوران", &["Loran"], Some("alexandria")),
                    Branch::new("smouha", "سموحة", &["Smouha"], Some("alexandria")),
                    Branch::new("mansoura", "المنصورة", &["Mansoura"], Some("mansoura")),
                ],
                vec![BranchId::new("loran")],
            ),
            "halan" => {
                let branches = vec![
                    Branch::new("nasr-city", "مدينه نصر", &["مدينة نصر"], Some("halan")),
                    Branch::new("hadayek-el-ahram", "حدائق الاهرام", &["حدايق الاهرام"], Some("halan")),
                    Branch::new("gesr-el-suez", "جسر السويس", &[], Some("halan")),
                    Branch::new("mokattam", "المقطم", &[], Some("halan")),
                    Branch::new("october", "اكتوبر", &[], Some("halan")),
                ];
                let priority = branches.iter().map(|b| b.id.clone()).collect();
                Self::new(branches, priority)
            }
            "goodsmart" => Self::new(
                vec![Branch::new("zaied", "Zaied", &["Zaied Branch"], Some("goodsmart"))],
                Vec::new(),
            ),
            "rabbit" => Self::new(
                [
                    ("mevida", "ميفيدا", "Mevida"),
                    ("maadi", "فرع المعادي", "MAADI"),
                    ("mohandseen", "فرع الدقي", "MOHANDSEEN"),
                    ("rehab", "فرع الرحاب", "Rehab"),
                    ("tagamoa", "فرع التجمع", "TGAMOE"),
                    ("masr-gedida", "فرع مصر الجديدة", "MASR GEDIDA"),
                    ("nasr-city", "فرع مدينة نصر", "Nasr City"),
                    ("october", "اكتوبر٢", "OCTOBER"),
                    ("dream", "فرع دريم", "Dream"),
                    ("zayed", "فرع زايد", "ZAYED"),
                    ("sodic", "فرع سوديك", "Sodic"),
                    ("madinaty", "مدينتي", "Madinaty"),
                ]
                .into_iter()
                .map(|(id, display, english)| Branch::new(id, display, &[english], None))
                .collect(),
                Vec::new(),
            ),
            "talabat" => Self::new(
                vec![
                    Branch::new("ibrahimia", "الابراهيميه", &["EG_Alex Ibrahimia"], Some("alexandria")),
                    Branch::new("sidi-bishr", "سيدي بشر", &["EG_Alex East_DS_ Sidi"], Some("alexandria")),
                    Branch::new("wingate", "وينجت", &["EG_Alex Wingate"], Some("alexandria")),
                ],
                vec![
                    BranchId::new("ibrahimia"),
                    BranchId::new("sidi-bishr"),
                    BranchId::new("wingate"),
                ],
            ),
            _ => Self::default(),
        }
    }
}

/// Product name lookups. Keys are trimmed source tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductTables {
    #[serde(default)]
    pub by_barcode: HashMap<String, String>,
    #[serde(default)]
    pub by_identifier: HashMap<String, String>,
    #[serde(default = "default_unknown_product")]
    pub unknown: String,
}

fn default_unknown_product() -> String {
    "unknown".to_string()
}

impl Default for ProductTables {
    fn default() -> Self {
        Self {
            by_barcode: HashMap::new(),
            by_identifier: HashMap::new(),
            unknown: default_unknown_product(),
        }
    }
}

impl ProductTables {
    /// Barcode first, then identifier, then the printed name when the source
    /// carries a trusted one, then `unknown`.
    pub fn resolve_name(&self, barcode: &str, identifier: &str, printed: Option<&str>) -> String {
        let lookup = |table: &HashMap<String, String>, key: &str| {
            let key = key.trim();
            (!key.is_empty())
                .then(|| table.get(key))
                .flatten()
                .map(|name| name.trim().to_string())
        };

        lookup(&self.by_barcode, barcode)
            .or_else(|| lookup(&self.by_identifier, identifier))
            .or_else(|| {
                printed
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| self.unknown.clone())
    }
}

/// Product → category membership plus the fixed display order of categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTable {
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub members: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_uncategorized")]
    pub uncategorized: String,
}

fn default_uncategorized() -> String {
    "uncategorized".to_string()
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            members: BTreeMap::new(),
            uncategorized: default_uncategorized(),
        }
    }
}

impl CategoryTable {
    pub fn category_of(&self, product: &str) -> &str {
        let product = product.trim();
        self.members
            .iter()
            .find(|(_, products)| products.iter().any(|p| p.trim() == product))
            .map(|(category, _)| category.as_str())
            .unwrap_or(&self.uncategorized)
    }

    /// Sort rank: declared categories in order, everything else after them.
    pub fn rank(&self, category: &str) -> usize {
        self.order
            .iter()
            .position(|c| c == category)
            .unwrap_or(self.order.len())
    }
}

/// All static lookup tables for a run, normally loaded from one TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub products: ProductTables,
    #[serde(default)]
    pub categories: CategoryTable,
    /// Per-client branch catalogs keyed by client name.
    #[serde(default)]
    pub clients: HashMap<String, BranchCatalog>,
}

impl Tables {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let tables = Self::from_toml_str(&content)?;
        info!(
            barcodes = tables.products.by_barcode.len(),
            identifiers = tables.products.by_identifier.len(),
            categories = tables.categories.members.len(),
            clients = tables.clients.len(),
            "Lookup tables loaded"
        );
        Ok(tables)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Configured catalog for a client, or its built-in one.
    pub fn catalog_for(&self, client: &str) -> BranchCatalog {
        match self.clients.get(client) {
            Some(catalog) if !catalog.is_empty() => catalog.clone(),
            _ => BranchCatalog::builtin(client),
        }
    }
}
