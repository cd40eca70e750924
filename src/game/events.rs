use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorldEventKind {
  SpeedBoost,
  OrbFrenzy,
  ShrinkAll,
  GrowAll,
  PowerUpRain,
  GoldRush,
  MegaOrbs,
  Berserk,
}

impl WorldEventKind {
  pub fn display_name(self) -> &'static str {
    match self {
      WorldEventKind::SpeedBoost => "HYPERSPEED FRENZY",
      WorldEventKind::OrbFrenzy => "ORB OVERLOAD",
      WorldEventKind::ShrinkAll => "DEATH SHRINK",
      WorldEventKind::GrowAll => "TITAN RISE",
      WorldEventKind::PowerUpRain => "POWER-UP RAIN",
      WorldEventKind::GoldRush => "GOLD RUSH",
      WorldEventKind::MegaOrbs => "MEGA ORB MADNESS",
      WorldEventKind::Berserk => "BERSERK MODE",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    Some(match value {
      "speedBoost" => WorldEventKind::SpeedBoost,
      "orbFrenzy" => WorldEventKind::OrbFrenzy,
      "shrinkAll" => WorldEventKind::ShrinkAll,
      "growAll" => WorldEventKind::GrowAll,
      "powerUpRain" => WorldEventKind::PowerUpRain,
      "goldRush" => WorldEventKind::GoldRush,
      "megaOrbs" => WorldEventKind::MegaOrbs,
      "berserk" => WorldEventKind::Berserk,
      _ => return None,
    })
  }

  /// The rotation the automatic scheduler draws from; shrinkAll, growAll and
  /// berserk are owner-only.
  pub fn random_auto(rng: &mut StdRng) -> Self {
    const POOL: [WorldEventKind; 5] = [
      WorldEventKind::OrbFrenzy,
      WorldEventKind::PowerUpRain,
      WorldEventKind::GoldRush,
      WorldEventKind::SpeedBoost,
      WorldEventKind::MegaOrbs,
    ];
    POOL[rng.gen_range(0..POOL.len())]
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldEvent {
  pub id: String,
  pub kind: WorldEventKind,
  pub name: String,
  pub started_at: i64,
  pub duration_ms: i64,
  #[serde(skip)]
  pub ends_at: i64,
}

impl WorldEvent {
  pub fn new(kind: WorldEventKind, now: i64, duration_ms: i64) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      kind,
      name: kind.display_name().to_string(),
      started_at: now,
      duration_ms,
      ends_at: now + duration_ms,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::SeedableRng;

  #[test]
  fn parse_round_trips_the_owner_command_names() {
    for name in [
      "speedBoost", "orbFrenzy", "shrinkAll", "growAll", "powerUpRain", "goldRush", "megaOrbs",
      "berserk",
    ] {
      assert!(WorldEventKind::parse(name).is_some(), "{name}");
    }
    assert!(WorldEventKind::parse("tornado").is_none());
  }

  #[test]
  fn auto_pool_excludes_destructive_kinds() {
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..64 {
      let kind = WorldEventKind::random_auto(&mut rng);
      assert!(kind != WorldEventKind::ShrinkAll && kind != WorldEventKind::Berserk);
    }
  }
}
