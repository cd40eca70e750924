use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CosmeticKind {
  Trail,
  Title,
  Badge,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cosmetic {
  pub id: String,
  pub kind: CosmeticKind,
  pub name: String,
  pub price: i64,
  pub emoji: String,
  pub glow: Option<String>,
  pub text: Option<String>,
  pub rarity: String,
  pub owner_only: bool,
  pub tags: Vec<String>,
}

// Catalog files use the upstream storefront export shape: items carry their
// gameplay fields as a JSON string under CustomData.
#[derive(Debug, Deserialize)]
struct RawCatalogFile {
  #[serde(rename = "Catalog")]
  catalog: Vec<RawCatalogItem>,
}

#[derive(Debug, Deserialize)]
struct RawCatalogItem {
  #[serde(rename = "ItemId")]
  item_id: String,
  #[serde(rename = "DisplayName")]
  display_name: String,
  #[serde(rename = "VirtualCurrencyPrices")]
  prices: Option<HashMap<String, i64>>,
  #[serde(rename = "CustomData")]
  custom_data: Option<String>,
  #[serde(rename = "Tags")]
  tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCustomData {
  #[serde(rename = "type")]
  kind: Option<String>,
  emoji: Option<String>,
  glow: Option<String>,
  text: Option<String>,
  rarity: Option<String>,
  #[serde(rename = "ownerOnly")]
  owner_only: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
  items: HashMap<String, Cosmetic>,
}

pub const FALLBACK_TITLE_ID: &str = "title_rookie";

impl Catalog {
  pub fn load_or_default(path: &str) -> Self {
    let mut catalog = match std::fs::read_to_string(path) {
      Ok(raw) => match serde_json::from_str::<RawCatalogFile>(&raw) {
        Ok(parsed) => Self::from_raw(parsed),
        Err(error) => {
          tracing::warn!(?error, path, "cosmetics catalog unreadable, using fallback");
          Self::default()
        }
      },
      Err(_) => {
        tracing::info!(path, "no cosmetics catalog file, using fallback");
        Self::default()
      }
    };
    catalog.ensure_fallback();
    catalog
  }

  fn from_raw(raw: RawCatalogFile) -> Self {
    let mut items = HashMap::new();
    for item in raw.catalog {
      let custom: RawCustomData = item
        .custom_data
        .as_deref()
        .and_then(|data| serde_json::from_str(data).ok())
        .unwrap_or_default();
      let kind = match custom.kind.as_deref() {
        Some("trail") => CosmeticKind::Trail,
        Some("title") => CosmeticKind::Title,
        _ => CosmeticKind::Badge,
      };
      let price = item
        .prices
        .as_ref()
        .and_then(|prices| prices.get("GC").copied())
        .unwrap_or(0);
      items.insert(
        item.item_id.clone(),
        Cosmetic {
          id: item.item_id,
          kind,
          name: item.display_name,
          price,
          emoji: custom.emoji.unwrap_or_else(|| "?".to_string()),
          glow: custom.glow,
          text: custom.text,
          rarity: custom.rarity.unwrap_or_else(|| "common".to_string()),
          owner_only: custom.owner_only.unwrap_or(false),
          tags: item.tags.unwrap_or_default(),
        },
      );
    }
    Self { items }
  }

  fn ensure_fallback(&mut self) {
    self.items.entry(FALLBACK_TITLE_ID.to_string()).or_insert(Cosmetic {
      id: FALLBACK_TITLE_ID.to_string(),
      kind: CosmeticKind::Title,
      name: "[ROOKIE]".to_string(),
      price: 0,
      emoji: "*".to_string(),
      glow: None,
      text: Some("[ROOKIE]".to_string()),
      rarity: "common".to_string(),
      owner_only: false,
      tags: Vec::new(),
    });
  }

  pub fn get(&self, id: &str) -> Option<&Cosmetic> {
    self.items.get(id)
  }

  pub fn items(&self) -> &HashMap<String, Cosmetic> {
    &self.items
  }

  pub fn all_ids(&self) -> Vec<String> {
    self.items.keys().cloned().collect()
  }
}
