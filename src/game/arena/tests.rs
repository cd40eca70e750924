use super::*;
use crate::game::constants::{
  GROW_PER_ORB, INIT_LEN, LOOT_CAP, SEG_SPACING, THIN_HEAD_KEEP, THIN_SEGMENT_THRESHOLD,
};
use tokio::sync::mpsc;

fn make_state() -> ArenaState {
  ArenaState::new(ArenaConfig::default(), StdRng::seed_from_u64(7), None)
}

fn add_session(
  state: &mut ArenaState,
  session_id: &str,
  snake_id: Option<&str>,
) -> mpsc::UnboundedReceiver<String> {
  let (sender, receiver) = mpsc::unbounded_channel();
  state.sessions.insert(
    session_id.to_string(),
    SessionEntry {
      sender,
      snake_id: snake_id.map(String::from),
      pending_input: None,
    },
  );
  receiver
}

fn make_human(id: &str, head: Vec2, len: usize) -> Snake {
  Snake {
    id: id.to_string(),
    name: format!("Human-{id}"),
    skin: "classic".to_string(),
    granted_skin: None,
    segments: make_segments(head, len),
    heading: 0.0,
    base_speed: SNAKE_SPEED,
    speed_multiplier: 1.0,
    boosting: false,
    grow_buffer: 0,
    width: width_for_len(len),
    alive: true,
    score: 0,
    session_coins: 0,
    kills: 0,
    kill_streak: 0,
    effects: HashMap::new(),
    grace_until: 0,
    is_owner: false,
    equipped_trail: None,
    equipped_title: None,
    equipped_badge: None,
    unlocked_cosmetics: Vec::new(),
    respawn_at: None,
    remove_at: None,
    kind: SnakeKind::Human {
      session_id: format!("session-{id}"),
      account_key: Some(format!("guest:human-{id}")),
    },
  }
}

fn make_bot(id: &str, head: Vec2, len: usize) -> Snake {
  let mut rng = StdRng::seed_from_u64(3);
  let controller = BotState::new(BOT_PROFILES[0], head, &mut rng);
  let mut snake = make_human(id, head, len);
  snake.name = format!("Bot-{id}");
  snake.kind = SnakeKind::Bot { controller };
  snake
}

fn make_test_orb(id: &str, position: Vec2, value: u32) -> Orb {
  Orb {
    id: id.to_string(),
    x: position.x,
    y: position.y,
    size: 6.0,
    value,
    rarity: OrbRarity::Normal,
    color: "#ffffff".to_string(),
  }
}

fn drain_messages(receiver: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
  let mut messages = Vec::new();
  while let Ok(payload) = receiver.try_recv() {
    messages.push(payload);
  }
  messages
}

#[test]
fn orb_pickup_keeps_the_live_count_invariant() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("a".to_string(), make_human("a", head, 40));
  state.orbs.push(make_test_orb("close", head, 3));
  state.orbs.push(make_test_orb("far", Vec2 { x: 4000.0, y: 4000.0 }, 1));

  state.run_orb_pass(0);

  assert_eq!(state.orbs.len(), 2);
  assert!(!state.orbs.iter().any(|orb| orb.id == "close"));
  let snake = state.snakes.get("a").expect("snake");
  assert_eq!(snake.grow_buffer, GROW_PER_ORB * 3);
  assert_eq!(snake.score, 3);
  assert_eq!(snake.session_coins, 1);
}

#[test]
fn at_most_one_orb_is_consumed_per_snake_per_tick() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("a".to_string(), make_human("a", head, 40));
  state.orbs.push(make_test_orb("first", head, 1));
  state.orbs.push(make_test_orb("second", head, 1));

  state.run_orb_pass(0);

  let remaining: Vec<&str> = state.orbs.iter().map(|orb| orb.id.as_str()).collect();
  assert!(remaining.contains(&"second"));
  assert_eq!(state.snakes.get("a").expect("snake").grow_buffer, GROW_PER_ORB);
}

#[test]
fn equal_length_head_on_kills_neither_snake() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("a".to_string(), make_human("a", head, 5));
  state.snakes.insert("b".to_string(), make_human("b", head, 5));

  state.run_snake_collision_pass(0);

  assert!(state.snakes.get("a").expect("a").alive);
  assert!(state.snakes.get("b").expect("b").alive);
}

#[test]
fn shorter_snake_dies_head_on_and_killer_is_credited() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  let mut victim = make_human("small", head, 5);
  victim.score = 100;
  state.snakes.insert("small".to_string(), victim);
  state.snakes.insert("big".to_string(), make_human("big", head, 30));

  state.run_snake_collision_pass(0);

  assert!(!state.snakes.get("small").expect("small").alive);
  let killer = state.snakes.get("big").expect("big");
  assert!(killer.alive);
  assert_eq!(killer.kills, 1);
  assert_eq!(killer.kill_streak, 1);
  assert_eq!(killer.score, 35 + 5);
  assert_eq!(killer.session_coins, 20 + 15);
}

#[test]
fn rage_wins_a_head_on_against_a_longer_snake() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("raging".to_string(), make_human("raging", head, 5));
  state.snakes.insert("long".to_string(), make_human("long", head, 60));
  {
    let snake = state.snakes.get_mut("raging").expect("raging");
    state.expiries.attach(snake, EffectKind::Rage, 0, 5000);
  }

  state.run_snake_collision_pass(0);

  assert!(state.snakes.get("raging").expect("raging").alive);
  assert!(!state.snakes.get("long").expect("long").alive);
}

#[test]
fn shield_absorbs_exactly_one_hit_even_with_two_threats() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("shielded".to_string(), make_human("shielded", head, 5));
  // Two rival bodies whose fifth segment sits exactly under the head.
  let offset = SEG_SPACING * 4.0;
  state.snakes.insert(
    "threat1".to_string(),
    make_human("threat1", Vec2 { x: head.x + offset, y: head.y }, 8),
  );
  state.snakes.insert(
    "threat2".to_string(),
    make_human("threat2", Vec2 { x: head.x + offset, y: head.y + 3.0 }, 8),
  );
  {
    let snake = state.snakes.get_mut("shielded").expect("shielded");
    state.expiries.attach(snake, EffectKind::Shield, 0, 10000);
  }

  state.run_snake_collision_pass(0);
  let shielded = state.snakes.get("shielded").expect("shielded");
  assert!(shielded.alive);
  assert!(!shielded.has_effect(EffectKind::Shield));

  // The shield is gone, so the same contact kills on the next pass.
  state.run_snake_collision_pass(0);
  assert!(!state.snakes.get("shielded").expect("shielded").alive);
}

#[test]
fn ghost_and_grace_suspend_snake_collisions() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  let offset = SEG_SPACING * 4.0;
  state.snakes.insert("ghosty".to_string(), make_human("ghosty", head, 5));
  state.snakes.insert(
    "wall_of_body".to_string(),
    make_human("wall_of_body", Vec2 { x: head.x + offset, y: head.y }, 8),
  );
  {
    let snake = state.snakes.get_mut("ghosty").expect("ghosty");
    state.expiries.attach(snake, EffectKind::Ghost, 0, 6000);
  }
  state.run_snake_collision_pass(0);
  assert!(state.snakes.get("ghosty").expect("ghosty").alive);

  // Swap ghost for spawn grace; still untouchable.
  {
    let snake = state.snakes.get_mut("ghosty").expect("ghosty");
    snake.effects.clear();
    snake.grace_until = i64::MAX;
  }
  state.run_snake_collision_pass(0);
  assert!(state.snakes.get("ghosty").expect("ghosty").alive);

  {
    let snake = state.snakes.get_mut("ghosty").expect("ghosty");
    snake.grace_until = 0;
  }
  state.run_snake_collision_pass(0);
  assert!(!state.snakes.get("ghosty").expect("ghosty").alive);
}

#[test]
fn death_drops_capped_loot_and_conserves_orb_totals() {
  let mut state = make_state();
  let victim = make_human("victim", Vec2 { x: 1000.0, y: 1000.0 }, 40);
  state.snakes.insert("victim".to_string(), victim);
  let orbs_before = state.orbs.len();

  state.kill_snake("victim", None, 1000);

  let expected_drop = (40usize / 2).min(LOOT_CAP);
  assert_eq!(state.orbs.len(), orbs_before + expected_drop);
  assert_eq!(state.global_kill_count, 1);
  let victim = state.snakes.get("victim").expect("victim");
  assert!(!victim.alive);
  assert_eq!(victim.remove_at, Some(1000 + HUMAN_REMOVE_DELAY_MS));

  // Second kill is a no-op.
  state.kill_snake("victim", None, 2000);
  assert_eq!(state.orbs.len(), orbs_before + expected_drop);
  assert_eq!(state.global_kill_count, 1);
}

#[test]
fn kill_streak_milestone_grants_scaling_bonus() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  let mut killer = make_human("killer", Vec2 { x: 2000.0, y: 2000.0 }, 30);
  killer.kill_streak = 2;
  state.snakes.insert("killer".to_string(), killer);
  let mut victim = make_human("victim", head, 40);
  victim.score = 100;
  state.snakes.insert("victim".to_string(), victim);

  state.kill_snake("victim", Some("killer".to_string()), 1000);

  let killer = state.snakes.get("killer").expect("killer");
  assert_eq!(killer.kill_streak, 3);
  // Base kill coins plus the milestone bonus.
  assert_eq!(killer.session_coins, (20 + 15) + 3 * STREAK_BONUS_COINS_PER);
  assert_eq!(state.kill_feed.len(), 1);
  assert_eq!(state.kill_feed[0].killer, "Human-killer");
}

#[test]
fn unattributed_death_transfers_no_score() {
  let mut state = make_state();
  let bystander = make_human("bystander", Vec2 { x: 2000.0, y: 2000.0 }, 30);
  state.snakes.insert("bystander".to_string(), bystander);
  let mut victim = make_human("victim", Vec2 { x: 1000.0, y: 1000.0 }, 40);
  victim.score = 500;
  state.snakes.insert("victim".to_string(), victim);

  state.kill_snake("victim", None, 1000);

  let bystander = state.snakes.get("bystander").expect("bystander");
  assert_eq!(bystander.score, 0);
  assert_eq!(bystander.kills, 0);
  assert!(state.kill_feed.is_empty());
}

#[test]
fn disconnect_flushes_the_life_exactly_once() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let mut state = ArenaState::new(ArenaConfig::default(), StdRng::seed_from_u64(7), Some(tx));
  let mut snake = make_human("leaver", Vec2 { x: 1000.0, y: 1000.0 }, 20);
  snake.score = 42;
  snake.session_coins = 17;
  state.snakes.insert("leaver".to_string(), snake);
  add_session(&mut state, "session-leaver", Some("leaver"));

  state.disconnect_session("session-leaver", 1000);
  state.disconnect_session("session-leaver", 1000);
  state.kill_snake("leaver", None, 2000);

  let mut flushes = Vec::new();
  while let Ok(update) = rx.try_recv() {
    if matches!(update, ProfileUpdate::LifeFlush { .. }) {
      flushes.push(update);
    }
  }
  assert_eq!(flushes.len(), 1);
  match &flushes[0] {
    ProfileUpdate::LifeFlush { key, score, coins, .. } => {
      assert_eq!(key, "guest:human-leaver");
      assert_eq!(*score, 42);
      assert_eq!(*coins, 17);
    }
    _ => panic!("unexpected update"),
  }
}

#[test]
fn portal_teleport_shifts_the_whole_body_and_sets_cooldowns() {
  let mut state = make_state();
  let entry_pos = Vec2 { x: 1000.0, y: 1000.0 };
  let exit_pos = Vec2 { x: 3000.0, y: 3000.0 };
  state.portals.insert(
    "p1".to_string(),
    Portal {
      id: "p1".to_string(),
      linked_id: "p2".to_string(),
      x: entry_pos.x,
      y: entry_pos.y,
      color: PORTAL_COLOR.to_string(),
      cooldowns: HashMap::new(),
    },
  );
  state.portals.insert(
    "p2".to_string(),
    Portal {
      id: "p2".to_string(),
      linked_id: "p1".to_string(),
      x: exit_pos.x,
      y: exit_pos.y,
      color: PORTAL_COLOR.to_string(),
      cooldowns: HashMap::new(),
    },
  );
  let mut snake = make_human("traveler", entry_pos, 6);
  snake.heading = 0.0;
  let tail_before = *snake.segments.last().expect("tail");
  state.snakes.insert("traveler".to_string(), snake);

  state.run_portal_pass(1000);

  let snake = state.snakes.get("traveler").expect("traveler");
  let head = snake.head().expect("head");
  assert!((head.x - (exit_pos.x + PORTAL_EXIT_OFFSET)).abs() < 1e-9);
  assert!((head.y - exit_pos.y).abs() < 1e-9);
  // The whole body shifted by the same delta.
  let tail = *snake.segments.last().expect("tail");
  assert!((tail.x - tail_before.x - (head.x - entry_pos.x)).abs() < 1e-9);
  assert!(state.portals.get("p1").expect("p1").cooldowns.contains_key("traveler"));
  assert!(state.portals.get("p2").expect("p2").cooldowns.contains_key("traveler"));

  // Standing on the linked portal during the cooldown does nothing.
  {
    let snake = state.snakes.get_mut("traveler").expect("traveler");
    let shift = Vec2 { x: exit_pos.x - head.x, y: exit_pos.y - head.y };
    for segment in &mut snake.segments {
      segment.x += shift.x;
      segment.y += shift.y;
    }
  }
  state.run_portal_pass(1500);
  let snake = state.snakes.get("traveler").expect("traveler");
  let head = snake.head().expect("head");
  assert!((head.x - exit_pos.x).abs() < 1e-9);

  // After the cooldown it fires again.
  state.run_portal_pass(1000 + PORTAL_COOLDOWN_MS);
  let snake = state.snakes.get("traveler").expect("traveler");
  let head = snake.head().expect("head");
  assert!((head.x - (entry_pos.x + PORTAL_EXIT_OFFSET)).abs() < 1e-9);
}

#[test]
fn magnet_pulls_only_nearby_orbs() {
  let mut state = make_state();
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  let mut snake = make_human("magnetic", head, 10);
  state.expiries.attach(&mut snake, EffectKind::Magnet, 0, 9000);
  state.snakes.insert("magnetic".to_string(), snake);
  state.orbs.push(make_test_orb("near", Vec2 { x: 1200.0, y: 1000.0 }, 1));
  state.orbs.push(make_test_orb("far", Vec2 { x: 1000.0, y: 2000.0 }, 1));

  state.run_magnet_pass(0);

  let near = state.orbs.iter().find(|orb| orb.id == "near").expect("near");
  assert!(near.x < 1200.0);
  assert!((near.y - 1000.0).abs() < 1e-9);
  let far = state.orbs.iter().find(|orb| orb.id == "far").expect("far");
  assert!((far.y - 2000.0).abs() < 1e-9);
}

#[test]
fn wall_contact_kills_unless_a_shield_absorbs_it() {
  let mut state = make_state();
  let outside = Vec2 { x: -20.0, y: 1000.0 };
  state.snakes.insert("doomed".to_string(), make_human("doomed", outside, 10));
  let mut saved = make_human("saved", outside, 10);
  state.expiries.attach(&mut saved, EffectKind::Shield, 0, 10000);
  state.snakes.insert("saved".to_string(), saved);

  state.run_wall_pass(1000);

  assert!(!state.snakes.get("doomed").expect("doomed").alive);
  let saved = state.snakes.get("saved").expect("saved");
  assert!(saved.alive);
  assert!(!saved.has_effect(EffectKind::Shield));
  let head = saved.head().expect("head");
  assert!(head.x >= 0.0 && head.x <= MAP_SIZE);
  // Steered back toward the arena center.
  assert!(saved.heading.cos() > 0.0);
}

#[test]
fn invalid_heading_is_ignored_and_the_last_valid_one_persists() {
  let mut state = make_state();
  let mut snake = make_human("pilot", Vec2 { x: 1000.0, y: 1000.0 }, 10);
  snake.heading = 1.0;
  state.snakes.insert("pilot".to_string(), snake);
  add_session(&mut state, "session-pilot", Some("pilot"));

  state.sessions.get_mut("session-pilot").expect("session").pending_input =
    Some((f64::NAN, true));
  state.apply_buffered_inputs();
  let snake = state.snakes.get("pilot").expect("pilot");
  assert_eq!(snake.heading, 1.0);
  assert!(snake.boosting);

  state.sessions.get_mut("session-pilot").expect("session").pending_input =
    Some((2.0, false));
  state.apply_buffered_inputs();
  let snake = state.snakes.get("pilot").expect("pilot");
  assert_eq!(snake.heading, 2.0);
  assert!(!snake.boosting);
}

#[test]
fn only_the_latest_buffered_input_is_applied() {
  let mut state = make_state();
  state
    .snakes
    .insert("pilot".to_string(), make_human("pilot", Vec2 { x: 1000.0, y: 1000.0 }, 10));
  add_session(&mut state, "session-pilot", Some("pilot"));

  let session = state.sessions.get_mut("session-pilot").expect("session");
  session.pending_input = Some((0.5, false));
  session.pending_input = Some((1.5, true));
  state.apply_buffered_inputs();

  let snake = state.snakes.get("pilot").expect("pilot");
  assert_eq!(snake.heading, 1.5);
  assert!(snake.boosting);
}

#[test]
fn dead_bots_respawn_near_a_live_human() {
  let mut state = make_state();
  let human_head = Vec2 { x: 2500.0, y: 2500.0 };
  state
    .snakes
    .insert("human".to_string(), make_human("human", human_head, 20));
  let mut bot = make_bot("bot", Vec2 { x: 4000.0, y: 4000.0 }, 10);
  bot.alive = false;
  bot.respawn_at = Some(0);
  state.snakes.insert("bot".to_string(), bot);

  state.run_scheduled_work(1);

  let bot = state.snakes.get("bot").expect("bot");
  assert!(bot.alive);
  assert!(bot.respawn_at.is_none());
  assert_eq!(bot.len(), BOT_INIT_LEN);
  let head = bot.head().expect("head");
  assert!((head.x - human_head.x).abs() <= BOT_RESPAWN_NEAR_HUMAN / 2.0 + 1e-9);
  assert!((head.y - human_head.y).abs() <= BOT_RESPAWN_NEAR_HUMAN / 2.0 + 1e-9);
}

#[test]
fn dead_humans_are_removed_after_the_grace_delay() {
  let mut state = make_state();
  let mut snake = make_human("gone", Vec2 { x: 1000.0, y: 1000.0 }, 10);
  snake.alive = false;
  snake.remove_at = Some(500);
  state.snakes.insert("gone".to_string(), snake);
  let mut rx = add_session(&mut state, "observer", None);

  state.run_scheduled_work(400);
  assert!(state.snakes.contains_key("gone"));

  state.run_scheduled_work(500);
  assert!(!state.snakes.contains_key("gone"));
  let messages = drain_messages(&mut rx);
  assert!(messages.iter().any(|payload| payload.contains("playerLeft")));
}

#[test]
fn world_event_applies_and_expires_at_the_tick_boundary() {
  let mut state = make_state();
  state
    .snakes
    .insert("racer".to_string(), make_human("racer", Vec2 { x: 1000.0, y: 1000.0 }, 10));

  state.start_event(WorldEventKind::SpeedBoost, 1000, 0);
  assert!(state.active_event.is_some());
  assert_eq!(state.snakes.get("racer").expect("racer").speed_multiplier, 2.0);

  state.run_scheduled_work(999);
  assert!(state.active_event.is_some());

  state.run_scheduled_work(1000);
  assert!(state.active_event.is_none());
  assert_eq!(state.snakes.get("racer").expect("racer").speed_multiplier, 1.0);
}

#[test]
fn expiry_of_a_missing_or_dead_snake_is_a_silent_noop() {
  let mut state = make_state();
  let mut snake = make_human("fleeting", Vec2 { x: 1000.0, y: 1000.0 }, 10);
  state.expiries.attach(&mut snake, EffectKind::Ghost, 0, 1000);
  state.snakes.insert("fleeting".to_string(), snake);

  state.snakes.remove("fleeting");
  state.drain_effect_expiries(1000);

  let mut snake = make_human("dying", Vec2 { x: 1000.0, y: 1000.0 }, 10);
  state.expiries.attach(&mut snake, EffectKind::Ghost, 0, 1000);
  snake.alive = false;
  state.snakes.insert("dying".to_string(), snake);
  state.drain_effect_expiries(2000);
  // Dead snakes keep their map entry untouched.
  assert!(state.snakes.get("dying").expect("dying").has_effect(EffectKind::Ghost));
}

#[test]
fn segment_thinning_keeps_the_head_window_and_bounds_size() {
  let segments: Vec<Vec2> = (0..200)
    .map(|index| Vec2 { x: index as f64, y: 0.0 })
    .collect();
  let thinned = ArenaState::thin_segments(&segments);
  assert_eq!(thinned.len(), 115);
  for (index, segment) in thinned.iter().take(THIN_HEAD_KEEP).enumerate() {
    assert_eq!(segment.x, index as f64);
  }

  let short: Vec<Vec2> = (0..THIN_SEGMENT_THRESHOLD)
    .map(|index| Vec2 { x: index as f64, y: 0.0 })
    .collect();
  assert_eq!(ArenaState::thin_segments(&short).len(), THIN_SEGMENT_THRESHOLD);
}

#[test]
fn snapshots_cull_by_view_radius_but_keep_bots_when_configured() {
  let mut state = make_state();
  state.config.broadcast_bots_always = true;
  state
    .snakes
    .insert("me".to_string(), make_human("me", Vec2 { x: 500.0, y: 500.0 }, 10));
  state
    .snakes
    .insert("near".to_string(), make_human("near", Vec2 { x: 700.0, y: 500.0 }, 10));
  state
    .snakes
    .insert("far".to_string(), make_human("far", Vec2 { x: 4500.0, y: 4500.0 }, 10));
  state
    .snakes
    .insert("bot".to_string(), make_bot("bot", Vec2 { x: 4500.0, y: 500.0 }, 10));
  let mut rx = add_session(&mut state, "session-me", Some("me"));

  state.broadcast_snapshots(0);

  let messages = drain_messages(&mut rx);
  assert_eq!(messages.len(), 1);
  let value: serde_json::Value = serde_json::from_str(&messages[0]).expect("valid json");
  assert_eq!(value["type"], "state");
  let players = value["players"].as_object().expect("players map");
  assert!(players.contains_key("me"));
  assert!(players.contains_key("near"));
  assert!(players.contains_key("bot"));
  assert!(!players.contains_key("far"));

  // With the flag off, the distant bot is culled like anyone else.
  state.config.broadcast_bots_always = false;
  state.broadcast_snapshots(0);
  let messages = drain_messages(&mut rx);
  let value: serde_json::Value = serde_json::from_str(&messages[0]).expect("valid json");
  assert!(!value["players"].as_object().expect("players").contains_key("bot"));
}

#[test]
fn snapshots_never_mutate_the_underlying_entities() {
  let mut state = make_state();
  let segments_before;
  {
    let long = make_human("long", Vec2 { x: 500.0, y: 500.0 }, 300);
    segments_before = long.segments.clone();
    state.snakes.insert("long".to_string(), long);
  }
  let mut rx = add_session(&mut state, "session-long", Some("long"));

  state.broadcast_snapshots(0);
  drain_messages(&mut rx);

  assert_eq!(state.snakes.get("long").expect("long").segments, segments_before);
}

#[test]
fn join_beyond_capacity_is_rejected_with_server_full() {
  let mut state = make_state();
  state.config.max_players = 1;
  state.config.bot_count = 0;
  let catalog = Catalog::load_or_default("/nonexistent/catalog.json");
  let profile = fallback_profile("guest:one", "One");

  let mut rx_one = add_session(&mut state, "session-one", None);
  let mut rx_two = add_session(&mut state, "session-two", None);

  let first = state.admit_human(
    "session-one",
    "One".to_string(),
    "classic".to_string(),
    None,
    "guest:one".to_string(),
    &profile,
    &catalog,
    0,
  );
  assert!(first.is_some());
  let messages = drain_messages(&mut rx_one);
  assert!(messages.iter().any(|payload| payload.contains("\"joined\"")));

  let second = state.admit_human(
    "session-two",
    "Two".to_string(),
    "classic".to_string(),
    None,
    "guest:two".to_string(),
    &profile,
    &catalog,
    0,
  );
  assert!(second.is_none());
  let messages = drain_messages(&mut rx_two);
  assert!(messages.iter().any(|payload| payload.contains("serverFull")));
}

#[test]
fn owner_skins_are_withheld_from_regular_joins() {
  let mut state = make_state();
  state.config.bot_count = 0;
  state.config.owner_key = Some("sesame".to_string());
  let catalog = Catalog::load_or_default("/nonexistent/catalog.json");
  let profile = fallback_profile("guest:pleb", "Pleb");
  let _rx_pleb = add_session(&mut state, "session-pleb", None);
  let _rx_boss = add_session(&mut state, "session-boss", None);

  let pleb_id = state
    .admit_human(
      "session-pleb",
      "Pleb".to_string(),
      OWNER_SKINS[0].to_string(),
      None,
      "guest:pleb".to_string(),
      &profile,
      &catalog,
      0,
    )
    .expect("admitted");
  assert_eq!(state.snakes.get(&pleb_id).expect("pleb").skin, "classic");

  let boss_id = state
    .admit_human(
      "session-boss",
      "Boss".to_string(),
      OWNER_SKINS[0].to_string(),
      Some("sesame".to_string()),
      "guest:boss".to_string(),
      &profile,
      &catalog,
      0,
    )
    .expect("admitted");
  let boss = state.snakes.get(&boss_id).expect("boss");
  assert!(boss.is_owner);
  assert_eq!(boss.skin, OWNER_SKINS[0]);
}

#[test]
fn leaderboard_ranks_live_snakes_by_length() {
  let mut state = make_state();
  state
    .snakes
    .insert("short".to_string(), make_human("short", Vec2 { x: 500.0, y: 500.0 }, 10));
  state
    .snakes
    .insert("long".to_string(), make_human("long", Vec2 { x: 900.0, y: 900.0 }, 80));
  let mut dead = make_human("dead", Vec2 { x: 1500.0, y: 1500.0 }, 200);
  dead.alive = false;
  state.snakes.insert("dead".to_string(), dead);

  state.recompute_leaderboard();

  assert_eq!(state.leaderboard.len(), 2);
  assert_eq!(state.leaderboard[0].id, "long");
  assert_eq!(state.leaderboard[0].rank, 1);
  assert_eq!(state.leaderboard[1].id, "short");
}

#[test]
fn bomb_kills_unshielded_neighbors_and_pops_shields() {
  let mut state = make_state();
  let origin = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("bomber".to_string(), make_human("bomber", origin, 10));
  state.snakes.insert(
    "close".to_string(),
    make_human("close", Vec2 { x: 1100.0, y: 1000.0 }, 10),
  );
  let mut shielded = make_human("shielded", Vec2 { x: 1000.0, y: 1100.0 }, 10);
  state.expiries.attach(&mut shielded, EffectKind::Shield, 0, 10000);
  state.snakes.insert("shielded".to_string(), shielded);
  state.snakes.insert(
    "distant".to_string(),
    make_human("distant", Vec2 { x: 3000.0, y: 3000.0 }, 10),
  );

  state.apply_power_up("bomber", PowerUpKind::Bomb, 0);

  assert!(!state.snakes.get("close").expect("close").alive);
  let shielded = state.snakes.get("shielded").expect("shielded");
  assert!(shielded.alive);
  assert!(!shielded.has_effect(EffectKind::Shield));
  assert!(state.snakes.get("distant").expect("distant").alive);
  assert_eq!(state.snakes.get("bomber").expect("bomber").kills, 1);
}

#[test]
fn shrink_truncates_the_nearest_rival_to_a_floor() {
  let mut state = make_state();
  state.snakes.insert(
    "scissors".to_string(),
    make_human("scissors", Vec2 { x: 1000.0, y: 1000.0 }, 10),
  );
  state.snakes.insert(
    "nearest".to_string(),
    make_human("nearest", Vec2 { x: 1200.0, y: 1000.0 }, 100),
  );
  state.snakes.insert(
    "tiny".to_string(),
    make_human("tiny", Vec2 { x: 1100.0, y: 1000.0 }, INIT_LEN),
  );
  // Make the bigger snake the nearest.
  state.snakes.get_mut("tiny").expect("tiny").segments =
    make_segments(Vec2 { x: 4000.0, y: 4000.0 }, INIT_LEN);

  state.apply_power_up("scissors", PowerUpKind::Shrink, 0);

  assert_eq!(state.snakes.get("nearest").expect("nearest").len(), 60);

  // Shrinking something already at the floor leaves it alone.
  state.snakes.get_mut("nearest").expect("nearest").segments =
    make_segments(Vec2 { x: 4500.0, y: 4500.0 }, 300);
  state.apply_power_up("scissors", PowerUpKind::Shrink, 0);
  assert_eq!(state.snakes.get("tiny").expect("tiny").len(), INIT_LEN);
}

#[test]
fn freeze_slows_everyone_but_the_caster() {
  let mut state = make_state();
  state.snakes.insert(
    "caster".to_string(),
    make_human("caster", Vec2 { x: 1000.0, y: 1000.0 }, 10),
  );
  state.snakes.insert(
    "target".to_string(),
    make_human("target", Vec2 { x: 2000.0, y: 2000.0 }, 10),
  );

  state.apply_power_up("caster", PowerUpKind::Freeze, 0);

  assert!(!state.snakes.get("caster").expect("caster").has_effect(EffectKind::Frozen));
  assert!(state.snakes.get("target").expect("target").has_effect(EffectKind::Frozen));
  assert!(state.expiries.len() > 0);
}

#[test]
fn power_up_pickup_schedules_a_nearby_respawn() {
  let mut state = make_state();
  state.next_auto_event_at = i64::MAX;
  let head = Vec2 { x: 1000.0, y: 1000.0 };
  state.snakes.insert("grabby".to_string(), make_human("grabby", head, 10));
  state.power_ups.clear();
  state.power_ups.insert(
    "pu1".to_string(),
    PowerUp {
      id: "pu1".to_string(),
      x: head.x,
      y: head.y,
      kind: PowerUpKind::Ghost,
      spawned_at: 0,
    },
  );

  state.run_power_up_pass(1000);

  assert!(state.power_ups.is_empty());
  assert!(state.snakes.get("grabby").expect("grabby").has_effect(EffectKind::Ghost));
  assert_eq!(state.pending_power_ups.len(), 1);
  let (due_at, _) = state.pending_power_ups[0];
  assert!(due_at >= 1000 + POWER_UP_RESPAWN_BASE_MS);

  // Once due, the pending spawn becomes a live power-up again.
  state.run_scheduled_work(due_at);
  assert_eq!(state.power_ups.len(), 1);
  assert!(state.pending_power_ups.is_empty());
}

#[test]
fn portal_pair_lifecycle_is_deadline_driven() {
  let mut state = make_state();
  state.portal_phase = PortalPhase::Idle { next_at: 100 };

  state.run_scheduled_work(99);
  assert!(state.portals.is_empty());

  state.run_scheduled_work(100);
  assert_eq!(state.portals.len(), 2);
  let until = match state.portal_phase {
    PortalPhase::Live { until } => until,
    _ => panic!("expected live phase"),
  };
  assert_eq!(until, 100 + PORTAL_LIFETIME_MS);
  let ids: Vec<String> = state.portals.keys().cloned().collect();
  let linked: Vec<String> = state.portals.values().map(|p| p.linked_id.clone()).collect();
  assert!(ids.iter().all(|id| linked.contains(id)));

  state.run_scheduled_work(until);
  assert!(state.portals.is_empty());
  match state.portal_phase {
    PortalPhase::Idle { next_at } => assert!(next_at >= until + PORTAL_RESPAWN_BASE_MS),
    _ => panic!("expected idle phase"),
  }
}
