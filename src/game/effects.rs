use super::types::Snake;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerUpKind {
  Speed,
  Shield,
  Ghost,
  Magnet,
  Bomb,
  Freeze,
  Grow,
  Star,
  Rage,
  Shrink,
}

impl PowerUpKind {
  pub const ALL: [PowerUpKind; 10] = [
    PowerUpKind::Speed,
    PowerUpKind::Shield,
    PowerUpKind::Ghost,
    PowerUpKind::Magnet,
    PowerUpKind::Bomb,
    PowerUpKind::Freeze,
    PowerUpKind::Grow,
    PowerUpKind::Star,
    PowerUpKind::Rage,
    PowerUpKind::Shrink,
  ];

  /// Zero means the pickup resolves instantly and never enters the expiry queue.
  pub fn duration_ms(self) -> i64 {
    match self {
      PowerUpKind::Speed => 7000,
      PowerUpKind::Shield => 10000,
      PowerUpKind::Ghost => 6000,
      PowerUpKind::Magnet => 9000,
      PowerUpKind::Bomb => 0,
      PowerUpKind::Freeze => 4500,
      PowerUpKind::Grow => 0,
      PowerUpKind::Star => 8000,
      PowerUpKind::Rage => 5000,
      PowerUpKind::Shrink => 0,
    }
  }

  /// The timed effect this pickup puts on the collector, if any. Freeze is
  /// absent here: it lands on every *other* snake as `EffectKind::Frozen`.
  pub fn collector_effect(self) -> Option<EffectKind> {
    match self {
      PowerUpKind::Speed => Some(EffectKind::Speed),
      PowerUpKind::Shield => Some(EffectKind::Shield),
      PowerUpKind::Ghost => Some(EffectKind::Ghost),
      PowerUpKind::Magnet => Some(EffectKind::Magnet),
      PowerUpKind::Star => Some(EffectKind::Star),
      PowerUpKind::Rage => Some(EffectKind::Rage),
      PowerUpKind::Bomb | PowerUpKind::Freeze | PowerUpKind::Grow | PowerUpKind::Shrink => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectKind {
  Speed,
  Shield,
  Ghost,
  Magnet,
  Frozen,
  Star,
  Rage,
}

impl EffectKind {
  pub fn speed_multiplier(self) -> Option<f64> {
    match self {
      EffectKind::Speed => Some(1.9),
      EffectKind::Star => Some(1.35),
      EffectKind::Rage => Some(2.2),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct EffectInstance {
  pub until: i64,
  pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExpiryEntry {
  until: i64,
  seq: u64,
  snake_id: String,
  kind: EffectKind,
}

/// Pending effect expiries, drained at the top of every tick. Entries are
/// keyed by a sequence number so that a re-applied effect of the same kind
/// orphans the older entry instead of being cleared early by it.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
  heap: BinaryHeap<Reverse<ExpiryEntry>>,
  next_seq: u64,
}

impl ExpiryQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Attaches a timed effect to the snake and schedules its expiry.
  pub fn attach(&mut self, snake: &mut Snake, kind: EffectKind, now: i64, duration_ms: i64) {
    self.next_seq += 1;
    let seq = self.next_seq;
    let until = now + duration_ms;
    snake.effects.insert(kind, EffectInstance { until, seq });
    if let Some(multiplier) = kind.speed_multiplier() {
      snake.speed_multiplier = multiplier;
    }
    self.heap.push(Reverse(ExpiryEntry {
      until,
      seq,
      snake_id: snake.id.clone(),
      kind,
    }));
  }

  /// Pops every entry whose deadline has passed. The caller still has to
  /// validate each one against the live registry (`clear_if_current`).
  pub fn drain_due(&mut self, now: i64) -> Vec<(String, EffectKind, u64)> {
    let mut due = Vec::new();
    while let Some(Reverse(entry)) = self.heap.peek() {
      if entry.until > now {
        break;
      }
      let Some(Reverse(entry)) = self.heap.pop() else { break };
      due.push((entry.snake_id, entry.kind, entry.seq));
    }
    due
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }
}

/// Removes the effect if (and only if) the queue entry still names the live
/// instance. Returns true when the effect was actually cleared. Speed-kind
/// expiries restore base speed: the most recently triggered multiplier wins
/// while active and any one expiry resets it.
pub fn clear_if_current(snake: &mut Snake, kind: EffectKind, seq: u64) -> bool {
  match snake.effects.get(&kind) {
    Some(instance) if instance.seq == seq => {}
    _ => return false,
  }
  snake.effects.remove(&kind);
  if kind.speed_multiplier().is_some() {
    snake.speed_multiplier = 1.0;
  }
  true
}

/// Consumes an active shield. Used by the collision engine; the orphaned
/// queue entry later no-ops in `clear_if_current`.
pub fn pop_shield(snake: &mut Snake) -> bool {
  snake.effects.remove(&EffectKind::Shield).is_some()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::game::constants::{INIT_LEN, SNAKE_SPEED};
  use crate::game::snake::make_segments;
  use crate::game::types::{SnakeKind, Vec2};
  use std::collections::HashMap;

  fn make_snake(id: &str) -> Snake {
    Snake {
      id: id.to_string(),
      name: "Test".to_string(),
      skin: "classic".to_string(),
      granted_skin: None,
      segments: make_segments(Vec2 { x: 500.0, y: 500.0 }, INIT_LEN),
      heading: 0.0,
      base_speed: SNAKE_SPEED,
      speed_multiplier: 1.0,
      boosting: false,
      grow_buffer: 0,
      width: 8.0,
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
        session_id: "session".to_string(),
        account_key: None,
      },
    }
  }

  #[test]
  fn drain_due_returns_entries_in_deadline_order() {
    let mut queue = ExpiryQueue::new();
    let mut snake = make_snake("s1");
    queue.attach(&mut snake, EffectKind::Ghost, 0, 6000);
    queue.attach(&mut snake, EffectKind::Shield, 0, 10000);
    queue.attach(&mut snake, EffectKind::Rage, 0, 5000);

    assert!(queue.drain_due(4999).is_empty());
    let due = queue.drain_due(10000);
    let kinds: Vec<EffectKind> = due.iter().map(|(_, kind, _)| *kind).collect();
    assert_eq!(
      kinds,
      vec![EffectKind::Rage, EffectKind::Ghost, EffectKind::Shield]
    );
  }

  #[test]
  fn reapplied_effect_survives_the_stale_expiry() {
    let mut queue = ExpiryQueue::new();
    let mut snake = make_snake("s1");
    queue.attach(&mut snake, EffectKind::Ghost, 0, 6000);
    // Picked up again at t=3000, pushing the deadline out.
    queue.attach(&mut snake, EffectKind::Ghost, 3000, 6000);

    let due = queue.drain_due(6000);
    assert_eq!(due.len(), 1);
    let (_, kind, seq) = due[0];
    assert!(!clear_if_current(&mut snake, kind, seq));
    assert!(snake.has_effect(EffectKind::Ghost));

    let due = queue.drain_due(9000);
    assert_eq!(due.len(), 1);
    let (_, kind, seq) = due[0];
    assert!(clear_if_current(&mut snake, kind, seq));
    assert!(!snake.has_effect(EffectKind::Ghost));
  }

  #[test]
  fn speed_effects_are_last_writer_wins_and_reset_on_expiry() {
    let mut queue = ExpiryQueue::new();
    let mut snake = make_snake("s1");
    queue.attach(&mut snake, EffectKind::Rage, 0, 5000);
    assert_eq!(snake.speed_multiplier, 2.2);
    queue.attach(&mut snake, EffectKind::Star, 1000, 8000);
    assert_eq!(snake.speed_multiplier, 1.35);

    // Rage expires first and restores base speed even though star is active.
    for (_, kind, seq) in queue.drain_due(5000) {
      clear_if_current(&mut snake, kind, seq);
    }
    assert_eq!(snake.speed_multiplier, 1.0);
    assert!(snake.has_effect(EffectKind::Star));
  }

  #[test]
  fn popped_shield_does_not_resurface_at_expiry() {
    let mut queue = ExpiryQueue::new();
    let mut snake = make_snake("s1");
    queue.attach(&mut snake, EffectKind::Shield, 0, 10000);
    assert!(pop_shield(&mut snake));
    assert!(!pop_shield(&mut snake));

    for (_, kind, seq) in queue.drain_due(10000) {
      assert!(!clear_if_current(&mut snake, kind, seq));
    }
  }
}
