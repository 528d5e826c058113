// src/config.rs

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use toml_edit::{DocumentMut, value};
use tracing::info;

/// Key of the invoice counter inside the counter file.
const COUNTER_KEY: &str = "next_invoice_number";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub issuer: Issuer,
    #[serde(default = "default_tables_path")]
    pub tables_path: String,
    #[serde(default = "default_counter_path")]
    pub counter_path: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_tables_path() -> String {
    "config/tables.toml".to_string()
}

fn default_counter_path() -> String {
    "config/counter.toml".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer: Issuer::default(),
            tables_path: default_tables_path(),
            counter_path: default_counter_path(),
            output_dir: default_output_dir(),
        }
    }
}

/// Lines printed above and below every invoice view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issuer {
    #[serde(default = "default_issuer_header")]
    pub header: Vec<String>,
    #[serde(default = "default_issuer_footer")]
    pub footer: Vec<String>,
}

fn default_issuer_header() -> Vec<String> {
    vec![
        "شركه خضار للتجارة والتسويق".to_string(),
        "Khodar for Trading & Marketing".to_string(),
    ]
}

fn default_issuer_footer() -> Vec<String> {
    vec![
        "شركة خضار للتجارة و التسويق".to_string(),
        "ش.ذ.م.م".to_string(),
    ]
}

impl Default for Issuer {
    fn default() -> Self {
        Self {
            header: default_issuer_header(),
            footer: default_issuer_footer(),
        }
    }
}

#[derive(Deserialize)]
struct Counter {
    next_invoice_number: u64,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Seed for the next batch, read from the counter file.
    pub fn load_next_invoice_number(path: impl AsRef<Path>) -> Result<u64, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let counter: Counter = toml::from_str(&content)?;
        Ok(counter.next_invoice_number)
    }

    /// Rewrites only the counter key, leaving comments and other keys intact.
    pub fn store_next_invoice_number(
        path: impl AsRef<Path>,
        next: u64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let mut doc = if path.exists() {
            fs::read_to_string(path)?.parse::<DocumentMut>()?
        } else {
            DocumentMut::new()
        };

        doc[COUNTER_KEY] = value(i64::try_from(next)?);

        fs::write(path, doc.to_string())?;
        info!(path = %path.display(), next, "Invoice counter persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg: Config = toml::from_str("output_dir = \"out\"\n[issuer]\nfooter = []\n").unwrap();
        assert_eq!(cfg.output_dir, "out");
        assert_eq!(cfg.tables_path, "config/tables.toml");
        assert_eq!(cfg.issuer.header.len(), 2);
        assert!(cfg.issuer.footer.is_empty());
    }

    #[test]
    fn test_counter_round_trip_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.toml");
        fs::write(&path, "# shared invoice counter\nnext_invoice_number = 4100\n").unwrap();

        assert_eq!(Config::load_next_invoice_number(&path).unwrap(), 4100);
        Config::store_next_invoice_number(&path, 4107).unwrap();
        assert_eq!(Config::load_next_invoice_number(&path).unwrap(), 4107);
        assert!(fs::read_to_string(&path).unwrap().starts_with("# shared invoice counter"));
    }

    #[test]
    fn test_store_creates_missing_counter_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.toml");
        Config::store_next_invoice_number(&path, 1).unwrap();
        assert_eq!(Config::load_next_invoice_number(&path).unwrap(), 1);
    }
}
