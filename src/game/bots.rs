use super::constants::{
  BOT_AMBUSH_LEAD, BOT_AMBUSH_MIN_RADIUS_SQ, BOT_EVADE_BOOST_MIN_LEN, BOT_EVADE_RADIUS_SQ,
  BOT_EVADE_SIZE_RATIO, BOT_GOLDEN_ORB_WEIGHT, BOT_HUNT_BOOST_MIN_LEN, BOT_HUNT_BOOST_RADIUS_SQ,
  BOT_HUNT_RADIUS_HIGH_SQ, BOT_HUNT_RADIUS_SQ, BOT_ORB_RADIUS_SQ, BOT_ORB_SCAN_LIMIT,
  BOT_POWER_UP_BOOST_RADIUS_SQ, BOT_POWER_UP_RADIUS_SQ, BOT_POWER_UP_SEEK_CHANCE,
  BOT_STUCK_EPSILON_SQ, BOT_STUCK_TICKS, BOT_WALL_MARGIN, BOT_WANDER_BOOST_CHANCE, MAP_SIZE,
};
use super::math::{angle_to, dist_sq, lerp_angle};
use super::types::{Orb, OrbRarity, Vec2};
use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::{FRAC_PI_2, PI};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStyle {
  Hunter,
  Ambusher,
  OrbHunter,
}

#[derive(Debug, Clone, Copy)]
pub struct BotProfile {
  pub name: &'static str,
  pub skin: &'static str,
  pub aggression: f64,
  pub style: BotStyle,
  pub taunt_rate: f64,
}

pub const BOT_PROFILES: [BotProfile; 7] = [
  BotProfile { name: "Viper", skin: "fire", aggression: 0.95, style: BotStyle::Hunter, taunt_rate: 0.4 },
  BotProfile { name: "Phantom", skin: "midnight", aggression: 0.50, style: BotStyle::Ambusher, taunt_rate: 0.1 },
  BotProfile { name: "Coil", skin: "toxic", aggression: 0.65, style: BotStyle::OrbHunter, taunt_rate: 0.2 },
  BotProfile { name: "NightShade", skin: "ice", aggression: 0.80, style: BotStyle::Hunter, taunt_rate: 0.3 },
  BotProfile { name: "Taipan", skin: "lava", aggression: 0.70, style: BotStyle::OrbHunter, taunt_rate: 0.15 },
  BotProfile { name: "Nexus", skin: "electric", aggression: 0.85, style: BotStyle::Ambusher, taunt_rate: 0.25 },
  BotProfile { name: "Mamba", skin: "gold", aggression: 0.60, style: BotStyle::Hunter, taunt_rate: 0.2 },
];

pub const BOT_TAUNTS: [&str; 12] = [
  "get rekt", "too slow!", "catch me if you can", "gg no re", "skill issue", "L + ratio",
  "you're food", "not even close", "ez clap", "is that all?", "come get some",
  "back to the menu",
];

/// Per-bot controller scratch state, carried on the snake across ticks.
#[derive(Debug, Clone)]
pub struct BotState {
  pub profile: BotProfile,
  pub wander_angle: f64,
  pub turn_timer: i32,
  pub boost_timer: i32,
  pub taunt_timer: i32,
  pub stuck_ticks: u32,
  pub prev_head: Vec2,
  pub orb_cursor: usize,
}

impl BotState {
  pub fn new(profile: BotProfile, spawn: Vec2, rng: &mut StdRng) -> Self {
    Self {
      profile,
      wander_angle: rng.gen::<f64>() * PI * 2.0,
      turn_timer: 0,
      boost_timer: 0,
      taunt_timer: 150 + rng.gen_range(0..250),
      stuck_ticks: 0,
      prev_head: spawn,
      orb_cursor: 0,
    }
  }

  pub fn reset_after_respawn(&mut self, spawn: Vec2) {
    self.stuck_ticks = 0;
    self.prev_head = spawn;
  }
}

/// A rival snake as the controller sees it.
#[derive(Debug, Clone, Copy)]
pub struct RivalView {
  pub head: Vec2,
  pub length: usize,
  pub heading: f64,
  pub is_bot: bool,
  pub in_grace: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BotDecision {
  pub heading: f64,
  pub boosting: bool,
  pub taunt: Option<&'static str>,
}

/// The per-tick priority decision: wall avoidance, evade, hunt, power-up
/// seeking, orb seeking, wander. Steering always goes through `lerp_angle`
/// so paths stay curved.
pub fn decide(
  state: &mut BotState,
  head: Vec2,
  own_len: usize,
  current_heading: f64,
  currently_boosting: bool,
  kills: u32,
  rivals: &[RivalView],
  power_ups: &[Vec2],
  orbs: &[Orb],
  rng: &mut StdRng,
) -> BotDecision {
  let profile = state.profile;
  state.turn_timer -= 1;
  state.boost_timer -= 1;
  state.taunt_timer -= 1;

  if dist_sq(head, state.prev_head) < BOT_STUCK_EPSILON_SQ {
    state.stuck_ticks += 1;
  } else {
    state.stuck_ticks = 0;
    state.prev_head = head;
  }
  if state.stuck_ticks > BOT_STUCK_TICKS {
    state.wander_angle += PI * 0.8;
    state.stuck_ticks = 0;
  }

  let mut heading = current_heading;
  let mut boosting = currently_boosting;

  if head.x < BOT_WALL_MARGIN {
    heading = lerp_angle(heading, 0.0, 0.4);
  } else if head.x > MAP_SIZE - BOT_WALL_MARGIN {
    heading = lerp_angle(heading, PI, 0.4);
  }
  if head.y < BOT_WALL_MARGIN {
    heading = lerp_angle(heading, FRAC_PI_2, 0.4);
  } else if head.y > MAP_SIZE - BOT_WALL_MARGIN {
    heading = lerp_angle(heading, -FRAC_PI_2, 0.4);
  }

  let mut near_power_up: Option<(Vec2, f64)> = None;
  for position in power_ups {
    let d = dist_sq(head, *position);
    if d < near_power_up.map_or(BOT_POWER_UP_RADIUS_SQ, |(_, best)| best) {
      near_power_up = Some((*position, d));
    }
  }

  let mut hunt: Option<(RivalView, f64)> = None;
  for rival in rivals {
    if rival.is_bot || rival.in_grace {
      continue;
    }
    let d = dist_sq(head, rival.head);
    if d < hunt.map_or(f64::INFINITY, |(_, best)| best) {
      hunt = Some((*rival, d));
    }
  }

  let evade = rivals.iter().find(|rival| {
    dist_sq(head, rival.head) < BOT_EVADE_RADIUS_SQ
      && rival.length as f64 > own_len as f64 * BOT_EVADE_SIZE_RATIO
  });

  let aggression_range = if profile.aggression > 0.8 {
    BOT_HUNT_RADIUS_HIGH_SQ
  } else {
    BOT_HUNT_RADIUS_SQ
  };

  // The aggression roll happens only when a target is actually in range; a
  // failed roll falls through to the lower-priority tiers.
  let hunting = match hunt {
    Some((_, d)) if d < aggression_range => rng.gen::<f64>() < profile.aggression,
    _ => false,
  };

  if let Some(threat) = evade {
    heading = lerp_angle(heading, angle_to(threat.head, head), 0.35);
    boosting = own_len > BOT_EVADE_BOOST_MIN_LEN;
  } else if hunting {
    let (target, d) = hunt.expect("hunting implies a target");
    if profile.style == BotStyle::Ambusher && d > BOT_AMBUSH_MIN_RADIUS_SQ {
      let intercept = Vec2 {
        x: target.head.x + target.heading.cos() * BOT_AMBUSH_LEAD,
        y: target.head.y + target.heading.sin() * BOT_AMBUSH_LEAD,
      };
      heading = lerp_angle(heading, angle_to(head, intercept), 0.20);
    } else {
      heading = lerp_angle(heading, angle_to(head, target.head), 0.24);
    }
    boosting = d < BOT_HUNT_BOOST_RADIUS_SQ && own_len > BOT_HUNT_BOOST_MIN_LEN;
  } else if near_power_up.is_some() && rng.gen::<f64>() < BOT_POWER_UP_SEEK_CHANCE {
    let (position, d) = near_power_up.expect("checked above");
    heading = lerp_angle(heading, angle_to(head, position), 0.20);
    boosting = d < BOT_POWER_UP_BOOST_RADIUS_SQ;
  } else {
    seek_orbs_or_wander(state, head, &mut heading, &mut boosting, orbs, rng);
  }

  let mut taunt = None;
  if state.taunt_timer <= 0 && kills > 0 && rng.gen::<f64>() < profile.taunt_rate {
    taunt = Some(BOT_TAUNTS[rng.gen_range(0..BOT_TAUNTS.len())]);
    state.taunt_timer = 350 + rng.gen_range(0..500);
  }

  BotDecision { heading, boosting, taunt }
}

/// Fallback tiers: nearest orb within range (a bounded rotating window of the
/// pool, so long-pool arenas stay cheap), else eased wandering.
fn seek_orbs_or_wander(
  state: &mut BotState,
  head: Vec2,
  heading: &mut f64,
  boosting: &mut bool,
  orbs: &[Orb],
  rng: &mut StdRng,
) {
  let profile = state.profile;
  let mut nearest: Option<(Vec2, f64)> = None;
  if !orbs.is_empty() {
    let scan = orbs.len().min(BOT_ORB_SCAN_LIMIT);
    let start = state.orb_cursor % orbs.len();
    state.orb_cursor = state.orb_cursor.wrapping_add(scan);
    for offset in 0..scan {
      let orb = &orbs[(start + offset) % orbs.len()];
      let weight = if profile.style == BotStyle::OrbHunter && orb.rarity != OrbRarity::Normal {
        BOT_GOLDEN_ORB_WEIGHT
      } else {
        1.0
      };
      let d = dist_sq(head, orb.pos()) * weight;
      if d < nearest.map_or(BOT_ORB_RADIUS_SQ, |(_, best)| best) {
        nearest = Some((orb.pos(), d));
      }
    }
  }

  if let Some((target, _)) = nearest {
    *heading = lerp_angle(*heading, angle_to(head, target), 0.14);
  } else {
    if state.turn_timer <= 0 {
      state.wander_angle += (rng.gen::<f64>() - 0.5) * 1.2;
      state.turn_timer = 40 + rng.gen_range(0..80);
    }
    *heading = lerp_angle(*heading, state.wander_angle, 0.09);
  }

  if state.boost_timer <= 0 {
    *boosting = rng.gen::<f64>() < BOT_WANDER_BOOST_CHANCE;
    state.boost_timer = 30 + rng.gen_range(0..60);
  }
}
