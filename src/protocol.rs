use crate::cosmetics::Cosmetic;
use crate::game::effects::{EffectKind, PowerUpKind};
use crate::game::events::WorldEvent;
use crate::game::types::{KillFeedEntry, LeaderboardEntry, Orb, Portal, PowerUp, Vec2};
use crate::profile::ProfileSummary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  #[serde(rename = "join", rename_all = "camelCase")]
  Join {
    name: Option<String>,
    skin: Option<String>,
    owner_key: Option<String>,
    account_id: Option<String>,
  },
  #[serde(rename = "input")]
  Input { heading: f64, boosting: Option<bool> },
  #[serde(rename = "buyCosmetic", rename_all = "camelCase")]
  BuyCosmetic { cosmetic_id: String },
  #[serde(rename = "equipCosmetic", rename_all = "camelCase")]
  EquipCosmetic { cosmetic_id: String },
  #[serde(rename = "unequipCosmetic")]
  UnequipCosmetic { slot: String },
  #[serde(rename = "owner", rename_all = "camelCase")]
  Owner {
    key: String,
    action: OwnerAction,
    target_id: Option<String>,
    value: Option<String>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OwnerAction {
  Kick,
  Kill,
  GiveSkin,
  GiveSize,
  GiveCoins,
  SpawnPowerUp,
  SpawnPortals,
  Broadcast,
  StartEvent,
  EndEvent,
  ListPlayers,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEffect {
  pub kind: EffectKind,
  pub until: i64,
}

/// Per-observer presentation of one snake. Built by the view layer; never a
/// window back into the live entity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnakeState {
  pub segments: Vec<Vec2>,
  pub heading: f64,
  pub skin: String,
  pub granted_skin: Option<String>,
  pub name: String,
  pub width: f64,
  pub boosting: bool,
  pub is_owner: bool,
  pub is_bot: bool,
  pub equipped_trail: Option<String>,
  pub equipped_title: Option<String>,
  pub equipped_badge: Option<String>,
  pub active_effects: Vec<ActiveEffect>,
  pub ghost: bool,
  pub shield: bool,
  pub kill_streak: u32,
  pub score: i64,
  pub raging: bool,
  pub in_grace: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminPlayerEntry {
  pub id: String,
  pub name: String,
  pub skin: String,
  pub score: i64,
  pub length: usize,
  pub is_owner: bool,
  pub is_bot: bool,
  pub session_coins: i64,
  pub kills: u32,
  pub kill_streak: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
  #[serde(rename = "joined", rename_all = "camelCase")]
  Joined {
    player_id: String,
    is_owner: bool,
    map_size: f64,
    orbs: Vec<Orb>,
    power_ups: Vec<PowerUp>,
    portals: Vec<Portal>,
    kill_feed: Vec<KillFeedEntry>,
    profile: ProfileSummary,
    cosmetics_catalog: HashMap<String, Cosmetic>,
    grace_ms: i64,
  },
  #[serde(rename = "serverFull")]
  ServerFull { message: String },
  #[serde(rename = "state", rename_all = "camelCase")]
  State {
    players: HashMap<String, SnakeState>,
    leaderboard: Vec<LeaderboardEntry>,
    active_event: Option<WorldEvent>,
    power_ups: Vec<PowerUp>,
    portals: Vec<Portal>,
    my_coins: i64,
  },
  #[serde(rename = "playerJoined", rename_all = "camelCase")]
  PlayerJoined { id: String, name: String, is_owner: bool },
  #[serde(rename = "playerLeft")]
  PlayerLeft { id: String },
  #[serde(rename = "playerDied", rename_all = "camelCase")]
  PlayerDied {
    id: String,
    killer_name: String,
    dropped_orbs: Vec<Orb>,
    position: Vec2,
    length: usize,
  },
  #[serde(rename = "youDied", rename_all = "camelCase")]
  YouDied {
    killer_name: String,
    coins_earned: i64,
    score: i64,
    length: usize,
    kills: u32,
  },
  #[serde(rename = "killConfirmed", rename_all = "camelCase")]
  KillConfirmed {
    victim_name: String,
    coins_gained: i64,
    streak: u32,
    victim_length: usize,
  },
  #[serde(rename = "killStreakBonus", rename_all = "camelCase")]
  KillStreakBonus { streak: u32, bonus_coins: i64 },
  #[serde(rename = "killFeed")]
  KillFeed { entry: KillFeedEntry },
  #[serde(rename = "orbEaten", rename_all = "camelCase")]
  OrbEaten {
    orb_id: String,
    new_orb: Orb,
    eater_id: String,
  },
  #[serde(rename = "orbsDropped")]
  OrbsDropped { orbs: Vec<Orb> },
  #[serde(rename = "powerUpSpawned", rename_all = "camelCase")]
  PowerUpSpawned { power_up: PowerUp },
  #[serde(rename = "powerUpCollected", rename_all = "camelCase")]
  PowerUpCollected {
    power_up_id: String,
    player_id: String,
    kind: PowerUpKind,
  },
  #[serde(rename = "powerUpActivated", rename_all = "camelCase")]
  PowerUpActivated { kind: PowerUpKind, duration_ms: i64 },
  #[serde(rename = "effectExpired")]
  EffectExpired { kind: EffectKind },
  #[serde(rename = "shieldPopped")]
  ShieldPopped {},
  #[serde(rename = "bombExploded", rename_all = "camelCase")]
  BombExploded {
    x: f64,
    y: f64,
    player_id: String,
    killed: usize,
  },
  #[serde(rename = "freezeActivated", rename_all = "camelCase")]
  FreezeActivated { player_id: String, duration_ms: i64 },
  #[serde(rename = "portalsSpawned")]
  PortalsSpawned { portals: Vec<Portal> },
  #[serde(rename = "portalsRemoved")]
  PortalsRemoved { ids: Vec<String> },
  #[serde(rename = "portalUsed", rename_all = "camelCase")]
  PortalUsed {
    player_id: String,
    portal_id: String,
    dest_id: String,
  },
  #[serde(rename = "teleported")]
  Teleported { from: String, to: String },
  #[serde(rename = "botTaunt", rename_all = "camelCase")]
  BotTaunt {
    bot_id: String,
    name: String,
    message: String,
  },
  #[serde(rename = "systemMessage")]
  SystemMessage { message: String },
  #[serde(rename = "event")]
  Event { event: WorldEvent },
  #[serde(rename = "eventEnded")]
  EventEnded {},
  #[serde(rename = "skinGranted")]
  SkinGranted { skin: String },
  #[serde(rename = "coinsGranted", rename_all = "camelCase")]
  CoinsGranted { amount: i64, new_balance: i64 },
  #[serde(rename = "ownerResult")]
  OwnerResult { ok: bool, message: String },
  #[serde(rename = "playerList")]
  PlayerList { players: Vec<AdminPlayerEntry> },
  #[serde(rename = "cosmeticBought", rename_all = "camelCase")]
  CosmeticBought {
    cosmetic_id: String,
    new_coin_balance: i64,
    unlocked_cosmetics: Vec<String>,
  },
  #[serde(rename = "cosmeticEquipped", rename_all = "camelCase")]
  CosmeticEquipped {
    equipped_trail: Option<String>,
    equipped_title: Option<String>,
    equipped_badge: Option<String>,
  },
  #[serde(rename = "cosmeticError")]
  CosmeticError { message: String },
  #[serde(rename = "kicked")]
  Kicked { reason: String },
}

impl ServerMessage {
  pub fn encode(&self) -> String {
    serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"encodeError\"}".to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decode_join_with_optional_fields() {
    let raw = r#"{"type":"join","name":"Slinky","skin":"toxic","ownerKey":null}"#;
    let message: ClientMessage = serde_json::from_str(raw).expect("join decodes");
    match message {
      ClientMessage::Join { name, skin, owner_key, account_id } => {
        assert_eq!(name.as_deref(), Some("Slinky"));
        assert_eq!(skin.as_deref(), Some("toxic"));
        assert!(owner_key.is_none());
        assert!(account_id.is_none());
      }
      _ => panic!("unexpected message"),
    }
  }

  #[test]
  fn decode_input_and_owner_command() {
    let raw = r#"{"type":"input","heading":1.25,"boosting":true}"#;
    let message: ClientMessage = serde_json::from_str(raw).expect("input decodes");
    match message {
      ClientMessage::Input { heading, boosting } => {
        assert_eq!(heading, 1.25);
        assert_eq!(boosting, Some(true));
      }
      _ => panic!("unexpected message"),
    }

    let raw = r#"{"type":"owner","key":"k","action":"giveCoins","targetId":"abc","value":"250"}"#;
    let message: ClientMessage = serde_json::from_str(raw).expect("owner decodes");
    match message {
      ClientMessage::Owner { action, target_id, value, .. } => {
        assert_eq!(action, OwnerAction::GiveCoins);
        assert_eq!(target_id.as_deref(), Some("abc"));
        assert_eq!(value.as_deref(), Some("250"));
      }
      _ => panic!("unexpected message"),
    }
  }

  #[test]
  fn malformed_frames_fail_to_decode_without_panicking() {
    assert!(serde_json::from_str::<ClientMessage>("{").is_err());
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"warp"}"#).is_err());
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"input"}"#).is_err());
  }

  #[test]
  fn server_messages_tag_their_type() {
    let encoded = ServerMessage::ServerFull { message: "Server full!".to_string() }.encode();
    let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");
    assert_eq!(value["type"], "serverFull");
    assert_eq!(value["message"], "Server full!");

    let encoded = ServerMessage::KillStreakBonus { streak: 4, bonus_coins: 48 }.encode();
    let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");
    assert_eq!(value["type"], "killStreakBonus");
    assert_eq!(value["bonusCoins"], 48);
  }
}
