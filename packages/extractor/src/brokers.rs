//! Broker identities, corrective prompt instructions and broker definitions.
//!
//! [`KnownBroker`] is the instruction table consulted by the prompt builder.
//! Brokers outside the table can still be extracted; they simply get no
//! corrective note. Definitions loaded from YAML describe where a broker's
//! fee documents live and are independent of the table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Brokers for which extraction has known pitfalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownBroker {
    Bolero,
    DegiroBelgium,
    Rebel,
    Revolut,
    IngSelfInvest,
    KeytradeBank,
}

impl KnownBroker {
    pub const ALL: [KnownBroker; 6] = [
        Self::Bolero,
        Self::DegiroBelgium,
        Self::Rebel,
        Self::Revolut,
        Self::IngSelfInvest,
        Self::KeytradeBank,
    ];

    /// Canonical display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bolero => "Bolero",
            Self::DegiroBelgium => "Degiro Belgium",
            Self::Rebel => "Rebel",
            Self::Revolut => "Revolut",
            Self::IngSelfInvest => "ING Self Invest",
            Self::KeytradeBank => "Keytrade Bank",
        }
    }

    /// Resolve a broker identifier, ignoring case and accepting short aliases.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "bolero" => Some(Self::Bolero),
            "degiro" | "degiro belgium" => Some(Self::DegiroBelgium),
            "rebel" => Some(Self::Rebel),
            "revolut" => Some(Self::Revolut),
            "ing" | "ing self invest" => Some(Self::IngSelfInvest),
            "keytrade" | "keytrade bank" => Some(Self::KeytradeBank),
            _ => None,
        }
    }

    /// Corrective note appended to the extraction prompt.
    #[must_use]
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Bolero => {
                "Bolero uses a tiered schedule per order amount. Report every tier you find; \
                 a 5k order on Euronext Brussels costs EUR 15, not EUR 10."
            }
            Self::DegiroBelgium => {
                "Degiro charges a separate EUR 1 handling fee per order that is often missed. \
                 Look for 'handling fee', 'verwerkingskosten' or 'frais de traitement' and \
                 mention it in notes."
            }
            Self::Rebel => {
                "Use Euronext Brussels pricing, not Paris or Amsterdam. Look for 'Brussels', \
                 'Bruxelles' or the XBRU market code."
            }
            Self::Revolut => {
                "Extract trading fees regardless of region headers. Fees depend on the plan \
                 (Standard, Plus, Premium, Metal, Ultra); put free-order allowances per plan in notes."
            }
            Self::IngSelfInvest => {
                "ING Self Invest typically uses flat or percentage fees with a minimum. \
                 Check whether custody fees apply and mention them in notes."
            }
            Self::KeytradeBank => {
                "Keytrade Bank uses tiered fees per order amount. Report each tier separately."
            }
        }
    }
}

/// Look up the corrective instruction for a broker identifier.
#[must_use]
pub fn instruction_for(broker: &str) -> Option<&'static str> {
    KnownBroker::from_name(broker).map(|b| b.instruction())
}

/// Canonical name for a broker identifier; unknown identifiers are returned trimmed.
#[must_use]
pub fn canonical_name(broker: &str) -> String {
    KnownBroker::from_name(broker)
        .map(|b| b.name().to_string())
        .unwrap_or_else(|| broker.trim().to_string())
}

/// A place where a broker publishes fee information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub allowed_to_scrape: Option<bool>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Basic information about an investment broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broker {
    pub name: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Broker {
    /// Instruction table entry for this broker, if any.
    #[must_use]
    pub fn known(&self) -> Option<KnownBroker> {
        KnownBroker::from_name(&self.name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct BrokerFile {
    #[serde(default)]
    brokers: Vec<Broker>,
}

/// Parse broker definitions from a YAML document.
pub fn parse_brokers_yaml(yaml: &str) -> Result<Vec<Broker>> {
    if yaml.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: Option<BrokerFile> = serde_yaml_ng::from_str(yaml)?;
    Ok(file.unwrap_or_default().brokers)
}

/// Load broker definitions from a YAML file.
pub fn load_brokers_from_yaml(path: &Path) -> Result<Vec<Broker>> {
    let content = std::fs::read_to_string(path)?;
    parse_brokers_yaml(&content)
}

/// Aggregate broker definitions from several files.
///
/// Paths that do not exist or lack a `.yml`/`.yaml` extension are skipped.
pub fn load_brokers_from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Broker>> {
    let mut brokers = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml" | "yaml")
        );
        if !path.exists() || !is_yaml {
            tracing::debug!(path = %path.display(), "skipping broker config path");
            continue;
        }
        brokers.extend(load_brokers_from_yaml(path)?);
    }
    Ok(brokers)
}
