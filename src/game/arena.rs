use super::bots::{decide, BotState, RivalView, BOT_PROFILES};
use super::collision::{
  find_orb_hit, head_hits_body, heads_collide, resolve_head_on, wall_out_of_bounds, HeadOnOutcome,
};
use super::constants::{
  BOMB_RADIUS, BOOST_SHED_CHANCE, BOOST_SHED_MIN_LEN, BOT_COUNT, BOT_INIT_LEN,
  BOT_RESPAWN_BASE_MS, BOT_RESPAWN_JITTER_MS, BOT_RESPAWN_NEAR_HUMAN, BOT_RESPAWN_WALL_MARGIN,
  BROADCAST_MS, EVENT_AUTO_BASE_MS, EVENT_AUTO_DURATION_MS, EVENT_AUTO_JITTER_MS,
  EVENT_OWNER_DURATION_MS, GOLDEN_ORB_CHANCE, GOLDEN_ORB_COLOR, GOLDEN_ORB_SEED_COUNT,
  GROW_PER_ORB, GROW_SCORE_BONUS, GROW_SEGMENTS, HUMAN_REMOVE_DELAY_MS, INIT_LEN,
  KILL_COIN_FLAT, KILL_COIN_RATIO, KILL_FEED_LEN, KILL_SCORE_RATIO, LEADERBOARD_EVERY_TICKS,
  LOOT_CAP, LOOT_JITTER, LOOT_ORB_COLOR, LOOT_ORB_SIZE, LOOT_ORB_VALUE, MAGNET_PULL_CAP,
  MAGNET_PULL_SCALE, MAGNET_RADIUS, MAP_SIZE, MAX_PLAYERS, MEGA_ORB_CHANCE, MEGA_ORB_COLOR,
  MEGA_ORB_SEED_COUNT, ORB_COLOR_POOL, ORB_COUNT, ORB_HARD_CAP, OWNER_SKINS,
  PORTAL_COLOR, PORTAL_COOLDOWN_MS, PORTAL_EXIT_OFFSET, PORTAL_FIRST_SPAWN_MS,
  PORTAL_LIFETIME_MS, PORTAL_MARGIN, PORTAL_MIN_SEPARATION, PORTAL_RADIUS,
  PORTAL_RESPAWN_BASE_MS, PORTAL_RESPAWN_JITTER_MS, POWER_UP_MARGIN, POWER_UP_PICKUP_RADIUS,
  POWER_UP_RESPAWN_BASE_MS, POWER_UP_RESPAWN_JITTER_MS, POWER_UP_RESPAWN_SCATTER,
  POWER_UP_SEED_COUNT, SHRINK_KEEP_RATIO, SNAKE_SPEED, SPAWN_GRACE_MS, SPAWN_SCATTER_BOT,
  SPAWN_SCATTER_HUMAN, STREAK_BONUS_COINS_PER, STREAK_BONUS_MIN, TICK_MS, VIEW_RADIUS_SQ,
};
use super::effects::{clear_if_current, pop_shield, EffectKind, ExpiryQueue, PowerUpKind};
use super::events::{WorldEvent, WorldEventKind};
use super::input::parse_heading;
use super::math::{angle_to, clamp, dist_sq, within};
use super::snake::{advance, effective_speed, inflate, make_segments, truncate_to, width_for_len};
use super::types::{
  KillFeedEntry, Orb, OrbRarity, Portal, PowerUp, Snake, SnakeKind, Vec2,
};
use crate::cosmetics::{Catalog, CosmeticKind};
use crate::profile::{guest_key, Profile, ProfileStore, ProfileUpdate};
use crate::protocol::{AdminPlayerEntry, ClientMessage, OwnerAction, ServerMessage};
use crate::shared::names::sanitize_player_name;
use crate::shared::time::now_millis;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use uuid::Uuid;

mod view;
#[cfg(test)]
mod tests;

#[derive(Debug, Clone)]
pub struct ArenaConfig {
  pub max_players: usize,
  pub bot_count: usize,
  pub broadcast_bots_always: bool,
  pub owner_key: Option<String>,
}

impl Default for ArenaConfig {
  fn default() -> Self {
    Self {
      max_players: MAX_PLAYERS,
      bot_count: BOT_COUNT,
      broadcast_bots_always: true,
      owner_key: None,
    }
  }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArenaStats {
  pub players: usize,
  pub bots: usize,
  pub orbs: usize,
  pub power_ups: usize,
  pub portals: usize,
  pub active_event: Option<String>,
  pub global_kill_count: u64,
  pub total_sessions: usize,
}

pub struct Arena {
  state: Mutex<ArenaState>,
  ticking: AtomicBool,
  broadcasting: AtomicBool,
  store: Arc<ProfileStore>,
  catalog: Arc<Catalog>,
}

struct SessionEntry {
  sender: UnboundedSender<String>,
  snake_id: Option<String>,
  pending_input: Option<(f64, bool)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PortalPhase {
  Idle { next_at: i64 },
  Live { until: i64 },
}

struct ArenaState {
  config: ArenaConfig,
  sessions: HashMap<String, SessionEntry>,
  snakes: HashMap<String, Snake>,
  orbs: Vec<Orb>,
  power_ups: HashMap<String, PowerUp>,
  portals: HashMap<String, Portal>,
  pending_power_ups: Vec<(i64, Vec2)>,
  portal_phase: PortalPhase,
  active_event: Option<WorldEvent>,
  next_auto_event_at: i64,
  expiries: ExpiryQueue,
  leaderboard: Vec<super::types::LeaderboardEntry>,
  kill_feed: VecDeque<KillFeedEntry>,
  ticks: u64,
  global_kill_count: u64,
  rng: StdRng,
  profile_tx: Option<UnboundedSender<ProfileUpdate>>,
}

impl Arena {
  pub fn new(
    config: ArenaConfig,
    store: Arc<ProfileStore>,
    catalog: Arc<Catalog>,
    profile_tx: UnboundedSender<ProfileUpdate>,
  ) -> Self {
    let mut state = ArenaState::new(config, StdRng::from_entropy(), Some(profile_tx));
    state.seed_world(now_millis());
    Self {
      state: Mutex::new(state),
      ticking: AtomicBool::new(false),
      broadcasting: AtomicBool::new(false),
      store,
      catalog,
    }
  }

  pub async fn add_session(&self, sender: UnboundedSender<String>) -> String {
    let session_id = Uuid::new_v4().to_string();
    let mut state = self.state.lock().await;
    state.sessions.insert(
      session_id.clone(),
      SessionEntry {
        sender,
        snake_id: None,
        pending_input: None,
      },
    );
    session_id
  }

  pub async fn remove_session(&self, session_id: &str) {
    let mut state = self.state.lock().await;
    state.disconnect_session(session_id, now_millis());
  }

  pub async fn handle_text_message(self: &Arc<Self>, session_id: &str, text: &str) {
    let Ok(message) = serde_json::from_str::<ClientMessage>(text) else { return };
    self.handle_client_message(session_id, message).await;
  }

  async fn handle_client_message(self: &Arc<Self>, session_id: &str, message: ClientMessage) {
    match message {
      ClientMessage::Join { name, skin, owner_key, account_id } => {
        self.handle_join(session_id, name, skin, owner_key, account_id).await;
      }
      ClientMessage::Input { heading, boosting } => {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(session_id) {
          session.pending_input = Some((heading, boosting.unwrap_or(false)));
        }
      }
      ClientMessage::BuyCosmetic { cosmetic_id } => {
        self.handle_buy_cosmetic(session_id, &cosmetic_id).await;
      }
      ClientMessage::EquipCosmetic { cosmetic_id } => {
        self.handle_equip_cosmetic(session_id, &cosmetic_id).await;
      }
      ClientMessage::UnequipCosmetic { slot } => {
        self.handle_unequip_cosmetic(session_id, &slot).await;
      }
      ClientMessage::Owner { key, action, target_id, value } => {
        self.handle_owner_command(session_id, key, action, target_id, value).await;
      }
    }
  }

  async fn handle_join(
    self: &Arc<Self>,
    session_id: &str,
    name: Option<String>,
    skin: Option<String>,
    owner_key: Option<String>,
    account_id: Option<String>,
  ) {
    let raw_name = name.unwrap_or_else(|| "Snake".to_string());
    let display_name = sanitize_player_name(&raw_name, "Snake");
    let account_key = account_id
      .filter(|id| !id.trim().is_empty())
      .unwrap_or_else(|| guest_key(&display_name));

    // The profile lookup happens before the registry lock so a slow disk
    // never stalls a tick.
    let profile = match self.store.get_or_create(&account_key, &display_name).await {
      Ok(profile) => profile,
      Err(error) => {
        tracing::warn!(?error, %account_key, "profile load failed, joining with defaults");
        fallback_profile(&account_key, &display_name)
      }
    };

    let mut state = self.state.lock().await;
    state.admit_human(
      session_id,
      display_name,
      skin.unwrap_or_else(|| "classic".to_string()),
      owner_key,
      account_key,
      &profile,
      &self.catalog,
      now_millis(),
    );
    drop(state);
    self.ensure_loops();
  }

  async fn handle_buy_cosmetic(self: &Arc<Self>, session_id: &str, cosmetic_id: &str) {
    let Some(cosmetic) = self.catalog.get(cosmetic_id).cloned() else {
      let state = self.state.lock().await;
      state.send_to_session(session_id, &ServerMessage::CosmeticError {
        message: "Item not found.".to_string(),
      });
      return;
    };

    let (snake_id, account_key, session_coins, already_owned, is_owner) = {
      let state = self.state.lock().await;
      let Some((snake_id, snake)) = state.session_snake(session_id) else { return };
      (
        snake_id.to_string(),
        snake.account_key().unwrap_or_default().to_string(),
        snake.session_coins,
        snake.unlocked_cosmetics.iter().any(|id| id == cosmetic_id),
        snake.is_owner,
      )
    };

    if cosmetic.owner_only {
      self.send_locked(session_id, ServerMessage::CosmeticError {
        message: "Owner-only item.".to_string(),
      })
      .await;
      return;
    }
    if already_owned {
      self.send_locked(session_id, ServerMessage::CosmeticError {
        message: "Already owned.".to_string(),
      })
      .await;
      return;
    }

    let mut spent_from_session = 0;
    if cosmetic.price > 0 && !is_owner {
      spent_from_session = session_coins.min(cosmetic.price);
      let remainder = cosmetic.price - spent_from_session;
      if remainder > 0 {
        match self.store.spend_coins(&account_key, remainder).await {
          Ok(true) => {}
          Ok(false) => {
            self.send_locked(session_id, ServerMessage::CosmeticError {
              message: format!("Need {} coins.", cosmetic.price),
            })
            .await;
            return;
          }
          Err(error) => {
            tracing::warn!(?error, "cosmetic purchase failed");
            return;
          }
        }
      }
    }

    let unlocked = match self.store.unlock_cosmetic(&account_key, cosmetic_id).await {
      Ok(unlocked) => unlocked,
      Err(error) => {
        tracing::warn!(?error, "cosmetic unlock failed");
        return;
      }
    };
    let bank_coins = self
      .store
      .fetch(&account_key)
      .await
      .ok()
      .flatten()
      .map(|profile| profile.coins)
      .unwrap_or(0);

    let mut state = self.state.lock().await;
    let mut remaining_session = session_coins;
    if let Some(snake) = state.snakes.get_mut(&snake_id) {
      snake.session_coins = snake.session_coins.saturating_sub(spent_from_session);
      snake.unlocked_cosmetics = unlocked.clone();
      remaining_session = snake.session_coins;
    }
    state.send_to_session(session_id, &ServerMessage::CosmeticBought {
      cosmetic_id: cosmetic_id.to_string(),
      new_coin_balance: bank_coins + remaining_session,
      unlocked_cosmetics: unlocked,
    });
  }

  async fn handle_equip_cosmetic(self: &Arc<Self>, session_id: &str, cosmetic_id: &str) {
    let Some(cosmetic) = self.catalog.get(cosmetic_id).cloned() else { return };

    let mut state = self.state.lock().await;
    let Some((snake_id, snake)) = state.session_snake(session_id) else { return };
    let snake_id = snake_id.to_string();
    let account_key = snake.account_key().unwrap_or_default().to_string();
    if cosmetic.owner_only && !snake.is_owner {
      state.send_to_session(session_id, &ServerMessage::CosmeticError {
        message: "Owner-only item.".to_string(),
      });
      return;
    }
    let owned = snake.unlocked_cosmetics.iter().any(|id| id == cosmetic_id);
    if !snake.is_owner && !owned && cosmetic.price > 0 {
      state.send_to_session(session_id, &ServerMessage::CosmeticError {
        message: "You don't own this.".to_string(),
      });
      return;
    }

    let (slot, value) = match cosmetic.kind {
      CosmeticKind::Trail => ("trail", cosmetic.id.clone()),
      CosmeticKind::Title => ("title", cosmetic.text.clone().unwrap_or(cosmetic.name.clone())),
      CosmeticKind::Badge => ("badge", cosmetic.emoji.clone()),
    };
    let equipped = {
      let Some(snake) = state.snakes.get_mut(&snake_id) else { return };
      match cosmetic.kind {
        CosmeticKind::Trail => snake.equipped_trail = Some(value.clone()),
        CosmeticKind::Title => snake.equipped_title = Some(value.clone()),
        CosmeticKind::Badge => snake.equipped_badge = Some(value.clone()),
      }
      (
        snake.equipped_trail.clone(),
        snake.equipped_title.clone(),
        snake.equipped_badge.clone(),
      )
    };
    state.send_to_session(session_id, &ServerMessage::CosmeticEquipped {
      equipped_trail: equipped.0,
      equipped_title: equipped.1,
      equipped_badge: equipped.2,
    });
    drop(state);

    let store = Arc::clone(&self.store);
    let slot = slot.to_string();
    tokio::spawn(async move {
      if let Err(error) = store.set_equipped(&account_key, &slot, Some(&value)).await {
        tracing::warn!(?error, "equip persist failed");
      }
    });
  }

  async fn handle_unequip_cosmetic(self: &Arc<Self>, session_id: &str, slot: &str) {
    if !matches!(slot, "trail" | "title" | "badge") {
      return;
    }
    let mut state = self.state.lock().await;
    let Some((snake_id, snake)) = state.session_snake(session_id) else { return };
    let snake_id = snake_id.to_string();
    let account_key = snake.account_key().unwrap_or_default().to_string();
    let equipped = {
      let Some(snake) = state.snakes.get_mut(&snake_id) else { return };
      match slot {
        "trail" => snake.equipped_trail = None,
        "title" => snake.equipped_title = None,
        _ => snake.equipped_badge = None,
      }
      (
        snake.equipped_trail.clone(),
        snake.equipped_title.clone(),
        snake.equipped_badge.clone(),
      )
    };
    state.send_to_session(session_id, &ServerMessage::CosmeticEquipped {
      equipped_trail: equipped.0,
      equipped_title: equipped.1,
      equipped_badge: equipped.2,
    });
    drop(state);

    let store = Arc::clone(&self.store);
    let slot = slot.to_string();
    tokio::spawn(async move {
      if let Err(error) = store.set_equipped(&account_key, &slot, None).await {
        tracing::warn!(?error, "unequip persist failed");
      }
    });
  }

  async fn handle_owner_command(
    self: &Arc<Self>,
    session_id: &str,
    key: String,
    action: OwnerAction,
    target_id: Option<String>,
    value: Option<String>,
  ) {
    let mut state = self.state.lock().await;
    let authorized = state
      .config
      .owner_key
      .as_deref()
      .is_some_and(|expected| expected == key);
    if !authorized {
      state.send_to_session(session_id, &ServerMessage::OwnerResult {
        ok: false,
        message: "Invalid owner key.".to_string(),
      });
      return;
    }

    // Coin grants go through the profile store, so they leave the lock.
    if action == OwnerAction::GiveCoins {
      let amount = value.as_deref().and_then(|v| v.parse::<i64>().ok()).unwrap_or(100);
      let target = target_id
        .as_deref()
        .and_then(|id| state.snakes.get(id))
        .filter(|snake| !snake.is_bot())
        .map(|snake| {
          (
            snake.account_key().unwrap_or_default().to_string(),
            snake.session_id().map(str::to_string),
          )
        });
      drop(state);
      let Some((account_key, target_session)) = target else {
        self.send_locked(session_id, ServerMessage::OwnerResult {
          ok: false,
          message: "No such player.".to_string(),
        })
        .await;
        return;
      };
      let new_balance = match self.store.add_coins(&account_key, amount).await {
        Ok(balance) => balance,
        Err(error) => {
          tracing::warn!(?error, "owner coin grant failed");
          return;
        }
      };
      let state = self.state.lock().await;
      if let Some(target_session) = target_session {
        state.send_to_session(&target_session, &ServerMessage::CoinsGranted {
          amount,
          new_balance,
        });
      }
      state.send_to_session(session_id, &ServerMessage::OwnerResult {
        ok: true,
        message: "Coins granted.".to_string(),
      });
      return;
    }

    state.run_owner_action(session_id, action, target_id, value, now_millis());
  }

  async fn send_locked(self: &Arc<Self>, session_id: &str, message: ServerMessage) {
    let state = self.state.lock().await;
    state.send_to_session(session_id, &message);
  }

  pub async fn stats(&self) -> ArenaStats {
    let state = self.state.lock().await;
    ArenaStats {
      players: state
        .snakes
        .values()
        .filter(|snake| !snake.is_bot() && snake.alive)
        .count(),
      bots: state.snakes.values().filter(|snake| snake.is_bot() && snake.alive).count(),
      orbs: state.orbs.len(),
      power_ups: state.power_ups.len(),
      portals: state.portals.len(),
      active_event: state.active_event.as_ref().map(|event| event.name.clone()),
      global_kill_count: state.global_kill_count,
      total_sessions: state.sessions.len(),
    }
  }

  pub async fn leaderboard(&self) -> Vec<super::types::LeaderboardEntry> {
    let state = self.state.lock().await;
    state.leaderboard.clone()
  }

  pub async fn player_entries(&self) -> Vec<AdminPlayerEntry> {
    let state = self.state.lock().await;
    state.admin_player_entries()
  }

  /// Pushes a coin grant notification to a live player, by display name.
  pub async fn notify_coins_granted(&self, name: &str, amount: i64, new_balance: i64) -> bool {
    let state = self.state.lock().await;
    let session = state
      .snakes
      .values()
      .filter(|snake| !snake.is_bot())
      .find(|snake| snake.name.eq_ignore_ascii_case(name))
      .and_then(|snake| snake.session_id().map(str::to_string));
    match session {
      Some(session_id) => {
        state.send_to_session(&session_id, &ServerMessage::CoinsGranted { amount, new_balance });
        true
      }
      None => false,
    }
  }

  fn ensure_loops(self: &Arc<Self>) {
    if self
      .ticking
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      let arena = Arc::clone(self);
      tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(TICK_MS));
        loop {
          interval.tick().await;
          let mut state = arena.state.lock().await;
          if state.sessions.is_empty() {
            arena.ticking.store(false, Ordering::SeqCst);
            break;
          }
          state.tick(now_millis());
        }
      });
    }

    if self
      .broadcasting
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok()
    {
      let arena = Arc::clone(self);
      tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(BROADCAST_MS));
        loop {
          interval.tick().await;
          let mut state = arena.state.lock().await;
          if state.sessions.is_empty() {
            arena.broadcasting.store(false, Ordering::SeqCst);
            break;
          }
          state.broadcast_snapshots(now_millis());
        }
      });
    }
  }
}

impl ArenaState {
  fn new(config: ArenaConfig, rng: StdRng, profile_tx: Option<UnboundedSender<ProfileUpdate>>) -> Self {
    Self {
      config,
      sessions: HashMap::new(),
      snakes: HashMap::new(),
      orbs: Vec::new(),
      power_ups: HashMap::new(),
      portals: HashMap::new(),
      pending_power_ups: Vec::new(),
      portal_phase: PortalPhase::Idle { next_at: 0 },
      active_event: None,
      next_auto_event_at: 0,
      expiries: ExpiryQueue::new(),
      leaderboard: Vec::new(),
      kill_feed: VecDeque::new(),
      ticks: 0,
      global_kill_count: 0,
      rng,
      profile_tx,
    }
  }

  fn seed_world(&mut self, now: i64) {
    for _ in 0..ORB_COUNT {
      let orb = self.make_orb(None, false, false);
      self.orbs.push(orb);
    }
    for _ in 0..GOLDEN_ORB_SEED_COUNT {
      let orb = self.make_orb(None, true, false);
      self.orbs.push(orb);
    }
    for _ in 0..MEGA_ORB_SEED_COUNT {
      let orb = self.make_orb(None, false, true);
      self.orbs.push(orb);
    }
    for _ in 0..POWER_UP_SEED_COUNT {
      self.spawn_power_up(None, now);
    }
    self.portal_phase = PortalPhase::Idle { next_at: now + PORTAL_FIRST_SPAWN_MS };
    self.next_auto_event_at =
      now + EVENT_AUTO_BASE_MS + self.rng.gen_range(0..EVENT_AUTO_JITTER_MS);
  }

  // ---------------------------------------------------------------
  // Sessions & membership
  // ---------------------------------------------------------------

  fn session_snake(&self, session_id: &str) -> Option<(&str, &Snake)> {
    let session = self.sessions.get(session_id)?;
    let snake_id = session.snake_id.as_deref()?;
    let snake = self.snakes.get(snake_id)?;
    Some((snake_id, snake))
  }

  fn human_count(&self) -> usize {
    self
      .snakes
      .values()
      .filter(|snake| !snake.is_bot() && snake.alive)
      .count()
  }

  #[allow(clippy::too_many_arguments)]
  fn admit_human(
    &mut self,
    session_id: &str,
    name: String,
    skin: String,
    owner_key: Option<String>,
    account_key: String,
    profile: &Profile,
    catalog: &Catalog,
    now: i64,
  ) -> Option<String> {
    if self.human_count() >= self.config.max_players {
      self.send_to_session(session_id, &ServerMessage::ServerFull {
        message: "Server full!".to_string(),
      });
      return None;
    }

    let is_owner = self
      .config
      .owner_key
      .as_deref()
      .is_some_and(|expected| owner_key.as_deref() == Some(expected));
    let skin = if !is_owner && OWNER_SKINS.contains(&skin.as_str()) {
      "classic".to_string()
    } else {
      skin
    };

    let center = MAP_SIZE / 2.0;
    let spawn = Vec2 {
      x: center + (self.rng.gen::<f64>() - 0.5) * SPAWN_SCATTER_HUMAN,
      y: center + (self.rng.gen::<f64>() - 0.5) * SPAWN_SCATTER_HUMAN,
    };

    let id = Uuid::new_v4().to_string();
    let snake = Snake {
      id: id.clone(),
      name: name.clone(),
      skin,
      granted_skin: None,
      segments: make_segments(spawn, INIT_LEN),
      heading: 0.0,
      base_speed: SNAKE_SPEED,
      speed_multiplier: 1.0,
      boosting: false,
      grow_buffer: 0,
      width: width_for_len(INIT_LEN),
      alive: true,
      score: 0,
      session_coins: 0,
      kills: 0,
      kill_streak: 0,
      effects: HashMap::new(),
      grace_until: now + SPAWN_GRACE_MS,
      is_owner,
      equipped_trail: profile.equipped_trail.clone(),
      equipped_title: profile.equipped_title.clone(),
      equipped_badge: profile.equipped_badge.clone(),
      unlocked_cosmetics: if is_owner {
        catalog.all_ids()
      } else {
        profile.unlocked_cosmetics.clone()
      },
      respawn_at: None,
      remove_at: None,
      kind: SnakeKind::Human {
        session_id: session_id.to_string(),
        account_key: Some(account_key),
      },
    };
    self.snakes.insert(id.clone(), snake);
    if let Some(session) = self.sessions.get_mut(session_id) {
      session.snake_id = Some(id.clone());
    }

    self.ensure_bots(now);

    let joined = ServerMessage::Joined {
      player_id: id.clone(),
      is_owner,
      map_size: MAP_SIZE,
      orbs: self.orbs.clone(),
      power_ups: self.power_ups.values().cloned().collect(),
      portals: self.portals.values().cloned().collect(),
      kill_feed: self.kill_feed.iter().cloned().collect(),
      profile: profile.summary(),
      cosmetics_catalog: catalog.items().clone(),
      grace_ms: SPAWN_GRACE_MS,
    };
    self.send_to_session(session_id, &joined);
    self.broadcast_all(&ServerMessage::PlayerJoined { id: id.clone(), name, is_owner });
    tracing::info!(player_id = %id, is_owner, "player joined");
    Some(id)
  }

  fn disconnect_session(&mut self, session_id: &str, now: i64) {
    let Some(entry) = self.sessions.remove(session_id) else { return };
    let Some(snake_id) = entry.snake_id else { return };
    // A drop mid-game is an unattributed death: loot scatters, no killer
    // credit, and the life flush happens exactly once inside the pipeline.
    self.kill_snake(&snake_id, None, now);
    if let Some(snake) = self.snakes.get_mut(&snake_id) {
      snake.remove_at = Some(now);
    }
  }

  fn ensure_bots(&mut self, now: i64) {
    let mut current = self.snakes.values().filter(|snake| snake.is_bot()).count();
    let mut profile_index = current;
    while current < self.config.bot_count {
      self.spawn_bot(profile_index, now);
      profile_index += 1;
      current += 1;
    }
  }

  fn spawn_bot(&mut self, profile_index: usize, _now: i64) {
    let profile = BOT_PROFILES[profile_index % BOT_PROFILES.len()];
    let center = MAP_SIZE / 2.0;
    let spawn = Vec2 {
      x: center + (self.rng.gen::<f64>() - 0.5) * SPAWN_SCATTER_BOT,
      y: center + (self.rng.gen::<f64>() - 0.5) * SPAWN_SCATTER_BOT,
    };
    let id = format!("bot_{}", Uuid::new_v4());
    let controller = BotState::new(profile, spawn, &mut self.rng);
    let heading = self.rng.gen::<f64>() * std::f64::consts::PI * 2.0;
    let snake = Snake {
      id: id.clone(),
      name: profile.name.to_string(),
      skin: profile.skin.to_string(),
      granted_skin: None,
      segments: make_segments(spawn, BOT_INIT_LEN),
      heading,
      base_speed: SNAKE_SPEED,
      speed_multiplier: 1.0,
      boosting: false,
      grow_buffer: 0,
      width: width_for_len(BOT_INIT_LEN),
      alive: true,
      score: 0,
      session_coins: 0,
      kills: 0,
      kill_streak: 0,
      effects: HashMap::new(),
      grace_until: 0,
      is_owner: false,
      equipped_trail: None,
      equipped_title: Some("[BOT]".to_string()),
      equipped_badge: None,
      unlocked_cosmetics: Vec::new(),
      respawn_at: None,
      remove_at: None,
      kind: SnakeKind::Bot { controller },
    };
    self.snakes.insert(id, snake);
  }

  fn respawn_bot(&mut self, bot_id: &str, now: i64) {
    let human_heads: Vec<Vec2> = self
      .snakes
      .values()
      .filter(|snake| !snake.is_bot() && snake.alive)
      .filter_map(|snake| snake.head())
      .collect();
    let spawn = if human_heads.is_empty() {
      let center = MAP_SIZE / 2.0;
      Vec2 {
        x: center + (self.rng.gen::<f64>() - 0.5) * SPAWN_SCATTER_BOT,
        y: center + (self.rng.gen::<f64>() - 0.5) * SPAWN_SCATTER_BOT,
      }
    } else {
      let anchor = human_heads[self.rng.gen_range(0..human_heads.len())];
      Vec2 {
        x: clamp(
          anchor.x + (self.rng.gen::<f64>() - 0.5) * BOT_RESPAWN_NEAR_HUMAN,
          BOT_RESPAWN_WALL_MARGIN,
          MAP_SIZE - BOT_RESPAWN_WALL_MARGIN,
        ),
        y: clamp(
          anchor.y + (self.rng.gen::<f64>() - 0.5) * BOT_RESPAWN_NEAR_HUMAN,
          BOT_RESPAWN_WALL_MARGIN,
          MAP_SIZE - BOT_RESPAWN_WALL_MARGIN,
        ),
      }
    };
    let heading = self.rng.gen::<f64>() * std::f64::consts::PI * 2.0;

    let Some(snake) = self.snakes.get_mut(bot_id) else { return };
    snake.segments = make_segments(spawn, BOT_INIT_LEN);
    snake.heading = heading;
    snake.alive = true;
    snake.boosting = false;
    snake.score = 0;
    snake.session_coins = 0;
    snake.grow_buffer = 0;
    snake.width = width_for_len(BOT_INIT_LEN);
    snake.speed_multiplier = 1.0;
    snake.kill_streak = 0;
    snake.effects.clear();
    snake.respawn_at = None;
    if let SnakeKind::Bot { controller } = &mut snake.kind {
      controller.reset_after_respawn(spawn);
    }
    tracing::debug!(bot_id, "bot respawned");
  }

  // ---------------------------------------------------------------
  // Tick
  // ---------------------------------------------------------------

  fn tick(&mut self, now: i64) {
    self.ticks += 1;
    self.drain_effect_expiries(now);
    self.apply_buffered_inputs();
    self.run_scheduled_work(now);
    self.run_bot_controllers(now);
    self.run_movement(now);
    self.run_wall_pass(now);
    self.run_orb_pass(now);
    self.run_power_up_pass(now);
    self.run_portal_pass(now);
    self.run_magnet_pass(now);
    self.run_snake_collision_pass(now);
    if self.ticks % LEADERBOARD_EVERY_TICKS == 0 {
      self.recompute_leaderboard();
    }
  }

  fn drain_effect_expiries(&mut self, now: i64) {
    for (snake_id, kind, seq) in self.expiries.drain_due(now) {
      // The snake may have died or dropped since this was scheduled.
      let Some(snake) = self.snakes.get_mut(&snake_id) else { continue };
      if !snake.alive {
        continue;
      }
      if clear_if_current(snake, kind, seq) {
        let session = snake.session_id().map(str::to_string);
        if let Some(session_id) = session {
          self.send_to_session(&session_id, &ServerMessage::EffectExpired { kind });
        }
      }
    }
  }

  fn apply_buffered_inputs(&mut self) {
    let pending: Vec<(String, f64, bool)> = self
      .sessions
      .values_mut()
      .filter_map(|session| {
        let (heading, boosting) = session.pending_input.take()?;
        let snake_id = session.snake_id.clone()?;
        Some((snake_id, heading, boosting))
      })
      .collect();
    for (snake_id, heading, boosting) in pending {
      let Some(snake) = self.snakes.get_mut(&snake_id) else { continue };
      if !snake.alive {
        continue;
      }
      if let Some(heading) = parse_heading(heading) {
        snake.heading = heading;
      }
      snake.boosting = boosting;
    }
  }

  fn run_scheduled_work(&mut self, now: i64) {
    let respawn_ids: Vec<String> = self
      .snakes
      .iter()
      .filter(|(_, snake)| !snake.alive && snake.is_bot())
      .filter(|(_, snake)| snake.respawn_at.is_some_and(|at| now >= at))
      .map(|(id, _)| id.clone())
      .collect();
    for id in respawn_ids {
      self.respawn_bot(&id, now);
    }

    let remove_ids: Vec<String> = self
      .snakes
      .iter()
      .filter(|(_, snake)| !snake.alive && !snake.is_bot())
      .filter(|(_, snake)| snake.remove_at.is_some_and(|at| now >= at))
      .map(|(id, _)| id.clone())
      .collect();
    for id in remove_ids {
      self.snakes.remove(&id);
      self.broadcast_all(&ServerMessage::PlayerLeft { id });
    }

    let due: Vec<Vec2> = {
      let (ready, waiting): (Vec<_>, Vec<_>) =
        self.pending_power_ups.drain(..).partition(|(at, _)| now >= *at);
      self.pending_power_ups = waiting;
      ready.into_iter().map(|(_, near)| near).collect()
    };
    for near in due {
      self.spawn_power_up(Some(near), now);
    }

    match self.portal_phase {
      PortalPhase::Idle { next_at } if now >= next_at => self.spawn_portal_pair(now),
      PortalPhase::Live { until } if now >= until => self.remove_portal_pair(now),
      _ => {}
    }

    if let Some(event) = &self.active_event {
      if now >= event.ends_at {
        self.end_event();
      }
    } else if now >= self.next_auto_event_at {
      if self.human_count() > 0 {
        let kind = WorldEventKind::random_auto(&mut self.rng);
        self.start_event(kind, EVENT_AUTO_DURATION_MS, now);
      }
      self.next_auto_event_at =
        now + EVENT_AUTO_BASE_MS + self.rng.gen_range(0..EVENT_AUTO_JITTER_MS);
    }
  }

  fn run_bot_controllers(&mut self, now: i64) {
    let rivals: Vec<(String, RivalView)> = self
      .snakes
      .values()
      .filter(|snake| snake.alive)
      .filter_map(|snake| {
        let head = snake.head()?;
        Some((
          snake.id.clone(),
          RivalView {
            head,
            length: snake.len(),
            heading: snake.heading,
            is_bot: snake.is_bot(),
            in_grace: snake.in_grace(now),
          },
        ))
      })
      .collect();
    let power_up_positions: Vec<Vec2> = self.power_ups.values().map(PowerUp::pos).collect();
    let bot_ids: Vec<String> = self
      .snakes
      .values()
      .filter(|snake| snake.is_bot() && snake.alive)
      .map(|snake| snake.id.clone())
      .collect();

    let mut taunts: Vec<(String, String, &'static str)> = Vec::new();
    for bot_id in bot_ids {
      let others: Vec<RivalView> = rivals
        .iter()
        .filter(|(id, _)| id != &bot_id)
        .map(|(_, view)| *view)
        .collect();
      let Some(snake) = self.snakes.get_mut(&bot_id) else { continue };
      let Some(head) = snake.head() else { continue };
      let own_len = snake.len();
      let heading = snake.heading;
      let boosting = snake.boosting;
      let kills = snake.kills;
      let name = snake.name.clone();
      let SnakeKind::Bot { controller } = &mut snake.kind else { continue };
      let decision = decide(
        controller,
        head,
        own_len,
        heading,
        boosting,
        kills,
        &others,
        &power_up_positions,
        &self.orbs,
        &mut self.rng,
      );
      snake.heading = decision.heading;
      snake.boosting = decision.boosting;
      if let Some(taunt) = decision.taunt {
        taunts.push((bot_id, name, taunt));
      }
    }
    for (bot_id, name, message) in taunts {
      self.broadcast_all(&ServerMessage::BotTaunt {
        bot_id,
        name,
        message: message.to_string(),
      });
    }
  }

  fn run_movement(&mut self, _now: i64) {
    let ids: Vec<String> = self.snakes.keys().cloned().collect();
    for id in ids {
      let Some(snake) = self.snakes.get_mut(&id) else { continue };
      if !snake.alive {
        continue;
      }
      let speed = effective_speed(snake);
      advance(snake, speed);

      // Boost tax: long boosting snakes occasionally shed the tail segment
      // back into the world as an orb.
      let shed = snake.boosting
        && snake.len() > BOOST_SHED_MIN_LEN
        && self.rng.gen::<f64>() < BOOST_SHED_CHANCE;
      let mut shed_tail = None;
      if shed {
        shed_tail = snake.segments.pop();
        snake.width = width_for_len(snake.len());
      }
      if let Some(tail) = shed_tail {
        let mut orb = self.make_orb(Some(tail), false, false);
        orb.size = 7.0;
        orb.value = 1;
        self.orbs.push(orb);
        self.trim_orbs();
      }
    }
  }

  fn run_wall_pass(&mut self, now: i64) {
    let ids: Vec<String> = self.snakes.keys().cloned().collect();
    let center = Vec2 { x: MAP_SIZE / 2.0, y: MAP_SIZE / 2.0 };
    for id in ids {
      let Some(snake) = self.snakes.get_mut(&id) else { continue };
      if !snake.alive {
        continue;
      }
      let Some(head) = snake.head() else { continue };
      if !wall_out_of_bounds(head) {
        continue;
      }
      if pop_shield(snake) {
        // The shield absorbs the wall hit: pull the head back in bounds and
        // turn toward the center so the contact cannot re-trigger.
        let clamped = Vec2 {
          x: clamp(head.x, 0.0, MAP_SIZE),
          y: clamp(head.y, 0.0, MAP_SIZE),
        };
        snake.segments[0] = clamped;
        snake.heading = angle_to(clamped, center);
        let session = snake.session_id().map(str::to_string);
        if let Some(session_id) = session {
          self.send_to_session(&session_id, &ServerMessage::ShieldPopped {});
        }
        continue;
      }
      self.kill_snake(&id, None, now);
    }
  }

  fn run_orb_pass(&mut self, _now: i64) {
    let ids: Vec<String> = self.snakes.keys().cloned().collect();
    for id in ids {
      let Some(snake) = self.snakes.get(&id) else { continue };
      if !snake.alive {
        continue;
      }
      let Some(head) = snake.head() else { continue };
      let width = snake.width;
      let Some(index) = find_orb_hit(head, width, &self.orbs) else { continue };

      let eaten = self.orbs.remove(index);
      let replacement = self.make_orb(None, false, false);
      self.orbs.push(replacement.clone());

      let Some(snake) = self.snakes.get_mut(&id) else { continue };
      snake.grow_buffer += GROW_PER_ORB * eaten.value;
      snake.score += eaten.value as i64;
      snake.session_coins += (eaten.value as i64 + 2) / 3;

      // Pickup visuals only matter to observers near the orb.
      self.send_to_nearby(eaten.pos(), &ServerMessage::OrbEaten {
        orb_id: eaten.id,
        new_orb: replacement,
        eater_id: id,
      });
    }
  }

  fn run_power_up_pass(&mut self, now: i64) {
    let ids: Vec<String> = self.snakes.keys().cloned().collect();
    for id in ids {
      let Some(snake) = self.snakes.get(&id) else { continue };
      if !snake.alive {
        continue;
      }
      let Some(head) = snake.head() else { continue };
      let hit = self
        .power_ups
        .values()
        .find(|power_up| within(head, power_up.pos(), POWER_UP_PICKUP_RADIUS))
        .map(|power_up| power_up.id.clone());
      let Some(power_up_id) = hit else { continue };
      let Some(power_up) = self.power_ups.remove(&power_up_id) else { continue };

      let respawn_at =
        now + POWER_UP_RESPAWN_BASE_MS + self.rng.gen_range(0..POWER_UP_RESPAWN_JITTER_MS);
      self.pending_power_ups.push((respawn_at, power_up.pos()));

      self.broadcast_all(&ServerMessage::PowerUpCollected {
        power_up_id,
        player_id: id.clone(),
        kind: power_up.kind,
      });
      self.apply_power_up(&id, power_up.kind, now);
    }
  }

  fn apply_power_up(&mut self, collector_id: &str, kind: PowerUpKind, now: i64) {
    match kind {
      PowerUpKind::Bomb => {
        let Some(collector) = self.snakes.get(collector_id) else { return };
        let Some(origin) = collector.head() else { return };
        let victims: Vec<String> = self
          .snakes
          .values()
          .filter(|other| other.id != collector_id && other.alive)
          .filter(|other| {
            other
              .head()
              .is_some_and(|head| within(origin, head, BOMB_RADIUS))
          })
          .map(|other| other.id.clone())
          .collect();
        let mut killed = 0;
        for victim_id in victims {
          let Some(victim) = self.snakes.get_mut(&victim_id) else { continue };
          if pop_shield(victim) {
            let session = victim.session_id().map(str::to_string);
            if let Some(session_id) = session {
              self.send_to_session(&session_id, &ServerMessage::ShieldPopped {});
            }
            continue;
          }
          self.kill_snake(&victim_id, Some(collector_id.to_string()), now);
          killed += 1;
        }
        self.broadcast_all(&ServerMessage::BombExploded {
          x: origin.x,
          y: origin.y,
          player_id: collector_id.to_string(),
          killed,
        });
      }
      PowerUpKind::Grow => {
        let Some(collector) = self.snakes.get_mut(collector_id) else { return };
        inflate(collector, GROW_SEGMENTS);
        collector.score += GROW_SCORE_BONUS;
      }
      PowerUpKind::Shrink => {
        let Some(collector) = self.snakes.get(collector_id) else { return };
        let Some(origin) = collector.head() else { return };
        let nearest = self
          .snakes
          .values()
          .filter(|other| other.id != collector_id && other.alive)
          .filter_map(|other| other.head().map(|head| (other.id.clone(), dist_sq(origin, head))))
          .min_by(|a, b| a.1.total_cmp(&b.1))
          .map(|(id, _)| id);
        let Some(target_id) = nearest else { return };
        let Some(target) = self.snakes.get_mut(&target_id) else { return };
        let keep = (target.len() as f64 * SHRINK_KEEP_RATIO) as usize;
        truncate_to(target, keep);
        let target_session = target.session_id().map(str::to_string);
        let target_name = target.name.clone();
        if let Some(session_id) = target_session {
          self.send_to_session(&session_id, &ServerMessage::SystemMessage {
            message: "You were shrunk!".to_string(),
          });
        }
        let collector_session = self
          .snakes
          .get(collector_id)
          .and_then(|snake| snake.session_id().map(str::to_string));
        if let Some(session_id) = collector_session {
          self.send_to_session(&session_id, &ServerMessage::SystemMessage {
            message: format!("Shrunk {target_name}!"),
          });
        }
      }
      PowerUpKind::Freeze => {
        let duration = kind.duration_ms();
        let target_ids: Vec<String> = self
          .snakes
          .values()
          .filter(|other| other.id != collector_id && other.alive)
          .map(|other| other.id.clone())
          .collect();
        for target_id in target_ids {
          let Some(target) = self.snakes.get_mut(&target_id) else { continue };
          self.expiries.attach(target, EffectKind::Frozen, now, duration);
        }
        self.broadcast_all(&ServerMessage::FreezeActivated {
          player_id: collector_id.to_string(),
          duration_ms: duration,
        });
      }
      _ => {
        let Some(effect) = kind.collector_effect() else { return };
        let Some(collector) = self.snakes.get_mut(collector_id) else { return };
        self.expiries.attach(collector, effect, now, kind.duration_ms());
      }
    }

    let session = self
      .snakes
      .get(collector_id)
      .and_then(|snake| snake.session_id().map(str::to_string));
    if let Some(session_id) = session {
      self.send_to_session(&session_id, &ServerMessage::PowerUpActivated {
        kind,
        duration_ms: kind.duration_ms(),
      });
    }
  }

  fn run_portal_pass(&mut self, now: i64) {
    let ids: Vec<String> = self.snakes.keys().cloned().collect();
    for id in ids {
      let Some(snake) = self.snakes.get(&id) else { continue };
      if !snake.alive {
        continue;
      }
      let Some(head) = snake.head() else { continue };
      let entry = self
        .portals
        .values()
        .filter(|portal| {
          portal
            .cooldowns
            .get(&id)
            .map_or(true, |cooldown_until| now >= *cooldown_until)
        })
        .find(|portal| within(head, portal.pos(), PORTAL_RADIUS))
        .map(|portal| (portal.id.clone(), portal.linked_id.clone()));
      let Some((portal_id, dest_id)) = entry else { continue };
      let Some(dest_pos) = self.portals.get(&dest_id).map(Portal::pos) else { continue };

      let Some(snake) = self.snakes.get_mut(&id) else { continue };
      let exit = Vec2 {
        x: dest_pos.x + snake.heading.cos() * PORTAL_EXIT_OFFSET,
        y: dest_pos.y + snake.heading.sin() * PORTAL_EXIT_OFFSET,
      };
      let shift = Vec2 { x: exit.x - head.x, y: exit.y - head.y };
      for segment in &mut snake.segments {
        segment.x += shift.x;
        segment.y += shift.y;
      }
      let session = snake.session_id().map(str::to_string);

      for portal_key in [&portal_id, &dest_id] {
        if let Some(portal) = self.portals.get_mut(portal_key.as_str()) {
          portal.cooldowns.insert(id.clone(), now + PORTAL_COOLDOWN_MS);
        }
      }

      if let Some(session_id) = session {
        self.send_to_session(&session_id, &ServerMessage::Teleported {
          from: portal_id.clone(),
          to: dest_id.clone(),
        });
      }
      self.broadcast_all(&ServerMessage::PortalUsed {
        player_id: id,
        portal_id,
        dest_id,
      });
    }
  }

  fn run_magnet_pass(&mut self, _now: i64) {
    let magnet_heads: Vec<Vec2> = self
      .snakes
      .values()
      .filter(|snake| snake.alive && snake.has_effect(EffectKind::Magnet))
      .filter_map(Snake::head)
      .collect();
    for head in magnet_heads {
      for orb in &mut self.orbs {
        let d2 = dist_sq(head, orb.pos());
        if d2 < MAGNET_RADIUS * MAGNET_RADIUS && d2 > 1.0 {
          let d = d2.sqrt();
          let pull = (MAGNET_PULL_SCALE / d).min(MAGNET_PULL_CAP);
          orb.x += (head.x - orb.x) / d * pull;
          orb.y += (head.y - orb.y) / d * pull;
        }
      }
    }
  }

  fn run_snake_collision_pass(&mut self, now: i64) {
    struct CollisionView {
      id: String,
      head: Vec2,
      width: f64,
      len: usize,
      ghost: bool,
      grace: bool,
      segments: Vec<Vec2>,
    }

    let views: Vec<CollisionView> = self
      .snakes
      .values()
      .filter(|snake| snake.alive)
      .filter_map(|snake| {
        let head = snake.head()?;
        Some(CollisionView {
          id: snake.id.clone(),
          head,
          width: snake.width,
          len: snake.len(),
          ghost: snake.has_effect(EffectKind::Ghost),
          grace: snake.in_grace(now),
          segments: snake.segments.clone(),
        })
      })
      .collect();

    for subject in &views {
      if subject.ghost || subject.grace {
        continue;
      }
      let still_alive = self
        .snakes
        .get(&subject.id)
        .is_some_and(|snake| snake.alive);
      if !still_alive {
        continue;
      }

      for other in &views {
        if other.id == subject.id || other.ghost || other.grace {
          continue;
        }
        if !self.snakes.get(&other.id).is_some_and(|snake| snake.alive) {
          continue;
        }

        if head_hits_body(subject.head, subject.width, &other.segments, other.width) {
          if self.absorb_with_shield(&subject.id) {
            // One absorbed hit ends this snake's collision processing for
            // the tick.
            break;
          }
          self.kill_snake(&subject.id, Some(other.id.clone()), now);
          break;
        }

        if heads_collide(subject.head, subject.width, other.head, other.width) {
          let subject_rage = self
            .snakes
            .get(&subject.id)
            .is_some_and(|snake| snake.has_effect(EffectKind::Rage));
          let other_rage = self
            .snakes
            .get(&other.id)
            .is_some_and(|snake| snake.has_effect(EffectKind::Rage));
          match resolve_head_on(subject.len, subject_rage, other.len, other_rage) {
            HeadOnOutcome::FirstDies => {
              if self.absorb_with_shield(&subject.id) {
                break;
              }
              self.kill_snake(&subject.id, Some(other.id.clone()), now);
              break;
            }
            HeadOnOutcome::SecondDies => {
              if !self.absorb_with_shield(&other.id) {
                self.kill_snake(&other.id, Some(subject.id.clone()), now);
              }
            }
            HeadOnOutcome::Neither => {}
          }
        }
      }
    }
  }

  fn absorb_with_shield(&mut self, snake_id: &str) -> bool {
    let Some(snake) = self.snakes.get_mut(snake_id) else { return false };
    if !pop_shield(snake) {
      return false;
    }
    let session = snake.session_id().map(str::to_string);
    if let Some(session_id) = session {
      self.send_to_session(&session_id, &ServerMessage::ShieldPopped {});
    }
    true
  }

  // ---------------------------------------------------------------
  // Kill pipeline
  // ---------------------------------------------------------------

  fn kill_snake(&mut self, victim_id: &str, killer_id: Option<String>, now: i64) {
    let respawn_delay = BOT_RESPAWN_BASE_MS + self.rng.gen_range(0..BOT_RESPAWN_JITTER_MS);

    let Some(victim) = self.snakes.get_mut(victim_id) else { return };
    if !victim.alive {
      return;
    }
    victim.alive = false;
    let victim_name = victim.name.clone();
    let victim_score = victim.score;
    let victim_len = victim.len();
    let victim_head = victim.head().unwrap_or(Vec2 { x: MAP_SIZE / 2.0, y: MAP_SIZE / 2.0 });
    let victim_is_bot = victim.is_bot();
    let victim_session = victim.session_id().map(str::to_string);
    let victim_key = victim.account_key().map(str::to_string);
    let victim_kills = victim.kills;
    let coins_earned = victim.session_coins;
    let segments = victim.segments.clone();
    if victim_is_bot {
      victim.respawn_at = Some(now + respawn_delay);
    } else {
      victim.remove_at = Some(now + HUMAN_REMOVE_DELAY_MS);
      victim.session_coins = 0;
    }
    self.global_kill_count += 1;
    tracing::debug!(victim_id, is_bot = victim_is_bot, "snake died");

    // The one and only flush of this life into the persistent profile.
    if !victim_is_bot {
      if let (Some(tx), Some(key)) = (&self.profile_tx, &victim_key) {
        let _ = tx.send(ProfileUpdate::LifeFlush {
          key: key.clone(),
          name: victim_name.clone(),
          score: victim_score,
          coins: coins_earned,
        });
      }
    }

    let drop_count = (victim_len / 2).min(LOOT_CAP);
    let mut dropped = Vec::with_capacity(drop_count);
    for _ in 0..drop_count {
      let Some(anchor) = segments.get(self.rng.gen_range(0..segments.len().max(1))) else { break };
      let position = Vec2 {
        x: anchor.x + (self.rng.gen::<f64>() - 0.5) * LOOT_JITTER,
        y: anchor.y + (self.rng.gen::<f64>() - 0.5) * LOOT_JITTER,
      };
      let mut orb = self.make_orb(Some(position), false, false);
      orb.size = LOOT_ORB_SIZE;
      orb.value = LOOT_ORB_VALUE;
      orb.color = LOOT_ORB_COLOR.to_string();
      dropped.push(orb.clone());
      self.orbs.push(orb);
    }
    self.trim_orbs();

    let killer_name = match &killer_id {
      Some(id) => self
        .snakes
        .get(id)
        .map(|snake| snake.name.clone())
        .unwrap_or_else(|| "the wall".to_string()),
      None => "the wall".to_string(),
    };

    // The loot payload can be large; only observers near the death site get
    // it. The kill feed entry below is the cheap global signal.
    self.send_to_nearby(victim_head, &ServerMessage::PlayerDied {
      id: victim_id.to_string(),
      killer_name: killer_name.clone(),
      dropped_orbs: dropped,
      position: victim_head,
      length: victim_len,
    });

    if let Some(killer_id) = killer_id {
      self.reward_killer(&killer_id, victim_id, &victim_name, victim_score, victim_len, now);
    }

    if let Some(session_id) = victim_session {
      self.send_to_session(&session_id, &ServerMessage::YouDied {
        killer_name,
        coins_earned,
        score: victim_score,
        length: victim_len,
        kills: victim_kills,
      });
    }
  }

  fn reward_killer(
    &mut self,
    killer_id: &str,
    victim_id: &str,
    victim_name: &str,
    victim_score: i64,
    victim_len: usize,
    now: i64,
  ) {
    let Some(killer) = self.snakes.get_mut(killer_id) else { return };
    let coins_gained = (victim_score as f64 * KILL_COIN_RATIO) as i64 + KILL_COIN_FLAT;
    killer.score += (victim_score as f64 * KILL_SCORE_RATIO) as i64 + victim_len as i64;
    killer.session_coins += coins_gained;
    killer.kills += 1;
    killer.kill_streak += 1;
    let streak = killer.kill_streak;
    let killer_name = killer.name.clone();
    let killer_is_bot = killer.is_bot();
    let killer_session = killer.session_id().map(str::to_string);
    let killer_key = killer.account_key().map(str::to_string);

    let mut streak_bonus = 0;
    if streak >= STREAK_BONUS_MIN {
      streak_bonus = streak as i64 * STREAK_BONUS_COINS_PER;
      killer.session_coins += streak_bonus;
    }

    if !killer_is_bot {
      if let (Some(tx), Some(key)) = (&self.profile_tx, &killer_key) {
        let _ = tx.send(ProfileUpdate::KillRecorded { key: key.clone() });
      }
    }

    if let Some(session_id) = &killer_session {
      self.send_to_session(session_id, &ServerMessage::KillConfirmed {
        victim_name: victim_name.to_string(),
        coins_gained,
        streak,
        victim_length: victim_len,
      });
      if streak_bonus > 0 {
        self.send_to_session(session_id, &ServerMessage::KillStreakBonus {
          streak,
          bonus_coins: streak_bonus,
        });
      }
    }

    let entry = KillFeedEntry {
      id: Uuid::new_v4().to_string(),
      killer: killer_name,
      victim: victim_name.to_string(),
      killer_id: killer_id.to_string(),
      victim_id: victim_id.to_string(),
      is_bot: killer_is_bot,
      ts: now,
    };
    self.kill_feed.push_front(entry.clone());
    self.kill_feed.truncate(KILL_FEED_LEN);
    self.broadcast_all(&ServerMessage::KillFeed { entry });
  }

  // ---------------------------------------------------------------
  // Spawning
  // ---------------------------------------------------------------

  fn make_orb(&mut self, position: Option<Vec2>, golden: bool, mega: bool) -> Orb {
    let is_golden = golden || self.rng.gen::<f64>() < GOLDEN_ORB_CHANCE;
    let is_mega = mega || (!is_golden && self.rng.gen::<f64>() < MEGA_ORB_CHANCE);
    let position = position.unwrap_or_else(|| Vec2 {
      x: self.rng.gen::<f64>() * MAP_SIZE,
      y: self.rng.gen::<f64>() * MAP_SIZE,
    });
    let (rarity, color, size, value) = if is_mega {
      (OrbRarity::Mega, MEGA_ORB_COLOR.to_string(), 16.0, 20)
    } else if is_golden {
      (OrbRarity::Golden, GOLDEN_ORB_COLOR.to_string(), 12.0, 8)
    } else {
      (
        OrbRarity::Normal,
        ORB_COLOR_POOL[self.rng.gen_range(0..ORB_COLOR_POOL.len())].to_string(),
        self.rng.gen::<f64>() * 5.0 + 4.0,
        self.rng.gen_range(1..4),
      )
    };
    Orb {
      id: Uuid::new_v4().to_string(),
      x: position.x,
      y: position.y,
      size,
      value,
      rarity,
      color,
    }
  }

  fn trim_orbs(&mut self) {
    if self.orbs.len() > ORB_HARD_CAP {
      let excess = self.orbs.len() - ORB_HARD_CAP;
      self.orbs.drain(0..excess);
    }
  }

  fn spawn_power_up(&mut self, near: Option<Vec2>, now: i64) {
    let kind = PowerUpKind::ALL[self.rng.gen_range(0..PowerUpKind::ALL.len())];
    let position = match near {
      Some(near) => Vec2 {
        x: clamp(
          near.x + (self.rng.gen::<f64>() - 0.5) * POWER_UP_RESPAWN_SCATTER,
          POWER_UP_MARGIN,
          MAP_SIZE - POWER_UP_MARGIN,
        ),
        y: clamp(
          near.y + (self.rng.gen::<f64>() - 0.5) * POWER_UP_RESPAWN_SCATTER,
          POWER_UP_MARGIN,
          MAP_SIZE - POWER_UP_MARGIN,
        ),
      },
      None => Vec2 {
        x: POWER_UP_MARGIN + self.rng.gen::<f64>() * (MAP_SIZE - POWER_UP_MARGIN * 2.0),
        y: POWER_UP_MARGIN + self.rng.gen::<f64>() * (MAP_SIZE - POWER_UP_MARGIN * 2.0),
      },
    };
    let power_up = PowerUp {
      id: Uuid::new_v4().to_string(),
      x: position.x,
      y: position.y,
      kind,
      spawned_at: now,
    };
    self.power_ups.insert(power_up.id.clone(), power_up.clone());
    self.broadcast_all(&ServerMessage::PowerUpSpawned { power_up });
  }

  fn spawn_portal_pair(&mut self, now: i64) {
    let random_spot = |rng: &mut StdRng| Vec2 {
      x: PORTAL_MARGIN + rng.gen::<f64>() * (MAP_SIZE - PORTAL_MARGIN * 2.0),
      y: PORTAL_MARGIN + rng.gen::<f64>() * (MAP_SIZE - PORTAL_MARGIN * 2.0),
    };
    let first_pos = random_spot(&mut self.rng);
    let mut second_pos = random_spot(&mut self.rng);
    while dist_sq(first_pos, second_pos) < PORTAL_MIN_SEPARATION * PORTAL_MIN_SEPARATION {
      second_pos = random_spot(&mut self.rng);
    }

    let first_id = Uuid::new_v4().to_string();
    let second_id = Uuid::new_v4().to_string();
    let first = Portal {
      id: first_id.clone(),
      linked_id: second_id.clone(),
      x: first_pos.x,
      y: first_pos.y,
      color: PORTAL_COLOR.to_string(),
      cooldowns: HashMap::new(),
    };
    let second = Portal {
      id: second_id.clone(),
      linked_id: first_id.clone(),
      x: second_pos.x,
      y: second_pos.y,
      color: PORTAL_COLOR.to_string(),
      cooldowns: HashMap::new(),
    };
    self.broadcast_all(&ServerMessage::PortalsSpawned {
      portals: vec![first.clone(), second.clone()],
    });
    self.portals.insert(first_id, first);
    self.portals.insert(second_id, second);
    self.portal_phase = PortalPhase::Live { until: now + PORTAL_LIFETIME_MS };
  }

  fn remove_portal_pair(&mut self, now: i64) {
    let ids: Vec<String> = self.portals.keys().cloned().collect();
    self.portals.clear();
    self.broadcast_all(&ServerMessage::PortalsRemoved { ids });
    self.portal_phase = PortalPhase::Idle {
      next_at: now + PORTAL_RESPAWN_BASE_MS + self.rng.gen_range(0..PORTAL_RESPAWN_JITTER_MS),
    };
  }

  // ---------------------------------------------------------------
  // World events
  // ---------------------------------------------------------------

  fn start_event(&mut self, kind: WorldEventKind, duration_ms: i64, now: i64) {
    let event = WorldEvent::new(kind, now, duration_ms);
    tracing::info!(name = %event.name, "world event started");
    match kind {
      WorldEventKind::SpeedBoost => {
        for snake in self.snakes.values_mut() {
          snake.speed_multiplier = 2.0;
        }
      }
      WorldEventKind::OrbFrenzy => {
        let fresh: Vec<Orb> = (0..500).map(|_| self.make_orb(None, false, false)).collect();
        self.orbs.extend(fresh.iter().cloned());
        self.trim_orbs();
        self.broadcast_all(&ServerMessage::OrbsDropped { orbs: fresh });
      }
      WorldEventKind::ShrinkAll => {
        for snake in self.snakes.values_mut() {
          if !snake.is_owner {
            let keep = snake.len() / 2;
            truncate_to(snake, keep);
          }
        }
      }
      WorldEventKind::GrowAll => {
        for snake in self.snakes.values_mut() {
          inflate(snake, GROW_SEGMENTS);
        }
      }
      WorldEventKind::PowerUpRain => {
        for _ in 0..25 {
          self.spawn_power_up(None, now);
        }
      }
      WorldEventKind::GoldRush => {
        let fresh: Vec<Orb> = (0..40).map(|_| self.make_orb(None, true, false)).collect();
        self.orbs.extend(fresh.iter().cloned());
        self.trim_orbs();
        self.broadcast_all(&ServerMessage::OrbsDropped { orbs: fresh });
      }
      WorldEventKind::MegaOrbs => {
        let fresh: Vec<Orb> = (0..20).map(|_| self.make_orb(None, false, true)).collect();
        self.orbs.extend(fresh.iter().cloned());
        self.trim_orbs();
        self.broadcast_all(&ServerMessage::OrbsDropped { orbs: fresh });
      }
      WorldEventKind::Berserk => {
        let ids: Vec<String> = self
          .snakes
          .values()
          .filter(|snake| snake.alive)
          .map(|snake| snake.id.clone())
          .collect();
        for id in ids {
          let Some(snake) = self.snakes.get_mut(&id) else { continue };
          self.expiries.attach(snake, EffectKind::Rage, now, duration_ms);
        }
        self.broadcast_all(&ServerMessage::SystemMessage {
          message: "BERSERK MODE! Everyone is enraged!".to_string(),
        });
      }
    }
    self.broadcast_all(&ServerMessage::Event { event: event.clone() });
    self.active_event = Some(event);
  }

  fn end_event(&mut self) {
    if self.active_event.take().is_none() {
      return;
    }
    for snake in self.snakes.values_mut() {
      snake.speed_multiplier = 1.0;
    }
    self.broadcast_all(&ServerMessage::EventEnded {});
  }

  // ---------------------------------------------------------------
  // Owner commands
  // ---------------------------------------------------------------

  fn run_owner_action(
    &mut self,
    session_id: &str,
    action: OwnerAction,
    target_id: Option<String>,
    value: Option<String>,
    now: i64,
  ) {
    let reply = |state: &ArenaState, ok: bool, message: String| {
      state.send_to_session(session_id, &ServerMessage::OwnerResult { ok, message });
    };
    match action {
      OwnerAction::Kick => {
        let Some(target_id) = target_id else {
          reply(self, false, "Missing target.".to_string());
          return;
        };
        let target = self
          .snakes
          .get(&target_id)
          .filter(|snake| !snake.is_bot())
          .map(|snake| (snake.name.clone(), snake.session_id().map(str::to_string)));
        let Some((name, session)) = target else {
          reply(self, false, "No such player.".to_string());
          return;
        };
        if let Some(target_session) = session {
          self.send_to_session(&target_session, &ServerMessage::Kicked {
            reason: value.unwrap_or_else(|| "Kicked.".to_string()),
          });
        }
        self.kill_snake(&target_id, None, now);
        reply(self, true, format!("Kicked {name}"));
      }
      OwnerAction::Kill => {
        let Some(target_id) = target_id else {
          reply(self, false, "Missing target.".to_string());
          return;
        };
        if self.snakes.contains_key(&target_id) {
          self.kill_snake(&target_id, None, now);
          reply(self, true, "Killed.".to_string());
        } else {
          reply(self, false, "No such player.".to_string());
        }
      }
      OwnerAction::GiveSkin => {
        let skin = value.unwrap_or_default();
        let Some(target) = target_id.and_then(|id| self.snakes.get_mut(&id)) else {
          reply(self, false, "No such player.".to_string());
          return;
        };
        target.skin = skin.clone();
        target.granted_skin = Some(skin.clone());
        let session = target.session_id().map(str::to_string);
        if let Some(target_session) = session {
          self.send_to_session(&target_session, &ServerMessage::SkinGranted { skin });
        }
        reply(self, true, "Skin granted.".to_string());
      }
      OwnerAction::GiveSize => {
        let extra = value.and_then(|v| v.parse::<usize>().ok()).unwrap_or(50);
        let Some(target) = target_id.and_then(|id| self.snakes.get_mut(&id)) else {
          reply(self, false, "No such player.".to_string());
          return;
        };
        inflate(target, extra);
        target.score += extra as i64 * 10;
        let session = target.session_id().map(str::to_string);
        if let Some(target_session) = session {
          self.send_to_session(&target_session, &ServerMessage::SystemMessage {
            message: format!("+{extra} size!"),
          });
        }
        reply(self, true, "Size granted.".to_string());
      }
      OwnerAction::GiveCoins => {
        // Handled on the async path; reaching here means a routing bug.
        reply(self, false, "Unsupported here.".to_string());
      }
      OwnerAction::SpawnPowerUp => {
        self.spawn_power_up(None, now);
        reply(self, true, "Power-up spawned.".to_string());
      }
      OwnerAction::SpawnPortals => {
        if !self.portals.is_empty() {
          self.remove_portal_pair(now);
        }
        self.spawn_portal_pair(now);
        reply(self, true, "Portals spawned.".to_string());
      }
      OwnerAction::Broadcast => {
        self.broadcast_all(&ServerMessage::SystemMessage {
          message: value.unwrap_or_default(),
        });
        reply(self, true, "Sent.".to_string());
      }
      OwnerAction::StartEvent => {
        let Some(kind) = value.as_deref().and_then(WorldEventKind::parse) else {
          reply(self, false, "Unknown event kind.".to_string());
          return;
        };
        if self.active_event.is_some() {
          self.end_event();
        }
        self.start_event(kind, EVENT_OWNER_DURATION_MS, now);
        let name = kind.display_name().to_string();
        reply(self, true, format!("Started: {name}"));
      }
      OwnerAction::EndEvent => {
        self.end_event();
        reply(self, true, "Event ended.".to_string());
      }
      OwnerAction::ListPlayers => {
        let players = self.admin_player_entries();
        self.send_to_session(session_id, &ServerMessage::PlayerList { players });
      }
    }
  }

  fn admin_player_entries(&self) -> Vec<AdminPlayerEntry> {
    self
      .snakes
      .values()
      .filter(|snake| snake.alive)
      .map(|snake| AdminPlayerEntry {
        id: snake.id.clone(),
        name: snake.name.clone(),
        skin: snake.skin.clone(),
        score: snake.score,
        length: snake.len(),
        is_owner: snake.is_owner,
        is_bot: snake.is_bot(),
        session_coins: snake.session_coins,
        kills: snake.kills,
        kill_streak: snake.kill_streak,
      })
      .collect()
  }

  // ---------------------------------------------------------------
  // Outbound plumbing
  // ---------------------------------------------------------------

  fn send_to_session(&self, session_id: &str, message: &ServerMessage) {
    let Some(session) = self.sessions.get(session_id) else { return };
    let _ = session.sender.send(message.encode());
  }

  fn broadcast_all(&mut self, message: &ServerMessage) {
    let payload = message.encode();
    let mut stale = Vec::new();
    for (session_id, session) in &self.sessions {
      if session.sender.send(payload.clone()).is_err() {
        stale.push(session_id.clone());
      }
    }
    let now = now_millis();
    for session_id in stale {
      self.disconnect_session(&session_id, now);
    }
  }

  /// Sends only to observers whose own head is within view range of `origin`.
  fn send_to_nearby(&mut self, origin: Vec2, message: &ServerMessage) {
    let payload = message.encode();
    let targets: Vec<String> = self
      .sessions
      .iter()
      .filter_map(|(session_id, session)| {
        let snake_id = session.snake_id.as_deref()?;
        let snake = self.snakes.get(snake_id)?;
        let head = snake.head()?;
        (dist_sq(head, origin) <= VIEW_RADIUS_SQ).then(|| session_id.clone())
      })
      .collect();
    for session_id in targets {
      if let Some(session) = self.sessions.get(&session_id) {
        let _ = session.sender.send(payload.clone());
      }
    }
  }
}

fn fallback_profile(key: &str, name: &str) -> Profile {
  Profile {
    id: key.to_string(),
    name: name.to_string(),
    coins: 0,
    total_score: 0,
    total_kills: 0,
    games_played: 0,
    high_score: 0,
    unlocked_cosmetics: vec!["title_rookie".to_string()],
    equipped_trail: None,
    equipped_title: None,
    equipped_badge: None,
    first_seen: 0,
    last_seen: 0,
  }
}
