use super::bots::BotState;
use super::effects::{EffectInstance, EffectKind, PowerUpKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
  pub x: f64,
  pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrbRarity {
  Normal,
  Golden,
  Mega,
}

#[derive(Debug, Clone, Serialize)]
pub struct Orb {
  pub id: String,
  pub x: f64,
  pub y: f64,
  pub size: f64,
  pub value: u32,
  pub rarity: OrbRarity,
  pub color: String,
}

impl Orb {
  pub fn pos(&self) -> Vec2 {
    Vec2 { x: self.x, y: self.y }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerUp {
  pub id: String,
  pub x: f64,
  pub y: f64,
  pub kind: PowerUpKind,
  #[serde(rename = "spawnedAt")]
  pub spawned_at: i64,
}

impl PowerUp {
  pub fn pos(&self) -> Vec2 {
    Vec2 { x: self.x, y: self.y }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Portal {
  pub id: String,
  #[serde(rename = "linkedId")]
  pub linked_id: String,
  pub x: f64,
  pub y: f64,
  pub color: String,
  /// Per-snake re-entry deadlines, server-side only.
  #[serde(skip)]
  pub cooldowns: HashMap<String, i64>,
}

impl Portal {
  pub fn pos(&self) -> Vec2 {
    Vec2 { x: self.x, y: self.y }
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KillFeedEntry {
  pub id: String,
  pub killer: String,
  pub victim: String,
  pub killer_id: String,
  pub victim_id: String,
  pub is_bot: bool,
  pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
  pub rank: usize,
  pub id: String,
  pub name: String,
  pub length: usize,
  pub score: i64,
  pub skin: String,
  pub is_owner: bool,
  pub is_bot: bool,
  pub equipped_title: Option<String>,
  pub equipped_badge: Option<String>,
  pub kill_streak: u32,
}

#[derive(Debug, Clone)]
pub enum SnakeKind {
  Human {
    session_id: String,
    account_key: Option<String>,
  },
  Bot {
    controller: BotState,
  },
}

#[derive(Debug, Clone)]
pub struct Snake {
  pub id: String,
  pub name: String,
  pub skin: String,
  pub granted_skin: Option<String>,
  pub segments: Vec<Vec2>,
  pub heading: f64,
  pub base_speed: f64,
  pub speed_multiplier: f64,
  pub boosting: bool,
  pub grow_buffer: u32,
  pub width: f64,
  pub alive: bool,
  pub score: i64,
  pub session_coins: i64,
  pub kills: u32,
  pub kill_streak: u32,
  pub effects: HashMap<EffectKind, EffectInstance>,
  pub grace_until: i64,
  pub is_owner: bool,
  pub equipped_trail: Option<String>,
  pub equipped_title: Option<String>,
  pub equipped_badge: Option<String>,
  pub unlocked_cosmetics: Vec<String>,
  pub respawn_at: Option<i64>,
  pub remove_at: Option<i64>,
  pub kind: SnakeKind,
}

impl Snake {
  pub fn is_bot(&self) -> bool {
    matches!(self.kind, SnakeKind::Bot { .. })
  }

  pub fn session_id(&self) -> Option<&str> {
    match &self.kind {
      SnakeKind::Human { session_id, .. } => Some(session_id),
      SnakeKind::Bot { .. } => None,
    }
  }

  pub fn account_key(&self) -> Option<&str> {
    match &self.kind {
      SnakeKind::Human { account_key, .. } => account_key.as_deref(),
      SnakeKind::Bot { .. } => None,
    }
  }

  pub fn head(&self) -> Option<Vec2> {
    self.segments.first().copied()
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn in_grace(&self, now: i64) -> bool {
    now < self.grace_until
  }

  pub fn has_effect(&self, kind: EffectKind) -> bool {
    self.effects.contains_key(&kind)
  }
}
