use super::constants::{
  BODY_FINE_SEGMENTS, BODY_RADIUS_SLACK, BODY_SKIP_SEGMENTS, MAP_SIZE, WALL_TOLERANCE,
};
use super::math::within;
use super::types::{Orb, Vec2};

pub fn wall_out_of_bounds(head: Vec2) -> bool {
  head.x < -WALL_TOLERANCE
    || head.x > MAP_SIZE + WALL_TOLERANCE
    || head.y < -WALL_TOLERANCE
    || head.y > MAP_SIZE + WALL_TOLERANCE
}

/// Index of the first orb the head overlaps, if any. Pickup radius is the
/// snake width plus the orb's visual size; `within` rejects distant orbs with
/// a bounding-box test before paying for the squared distance.
pub fn find_orb_hit(head: Vec2, width: f64, orbs: &[Orb]) -> Option<usize> {
  orbs
    .iter()
    .position(|orb| within(head, orb.pos(), width + orb.size))
}

/// Head-against-body test. The first few segments are skipped (they sit under
/// the other head and would false-positive constantly), and segments past the
/// fine-grained window are sampled at stride 2 to bound cost on long bodies.
pub fn head_hits_body(head: Vec2, own_width: f64, body: &[Vec2], other_width: f64) -> bool {
  let radius = (own_width + other_width - BODY_RADIUS_SLACK).max(1.0);
  let mut index = BODY_SKIP_SEGMENTS;
  while index < body.len() {
    if within(head, body[index], radius) {
      return true;
    }
    index += if index < BODY_FINE_SEGMENTS { 1 } else { 2 };
  }
  false
}

pub fn heads_collide(a: Vec2, a_width: f64, b: Vec2, b_width: f64) -> bool {
  within(a, b, a_width + b_width)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOnOutcome {
  Neither,
  FirstDies,
  SecondDies,
}

/// Head-on precedence: rage beats a non-raging opponent, otherwise the
/// strictly shorter snake loses. Equal length is a wash and both continue.
pub fn resolve_head_on(
  first_len: usize,
  first_rage: bool,
  second_len: usize,
  second_rage: bool,
) -> HeadOnOutcome {
  match (first_rage, second_rage) {
    (true, false) => HeadOnOutcome::SecondDies,
    (false, true) => HeadOnOutcome::FirstDies,
    _ => {
      if first_len < second_len {
        HeadOnOutcome::FirstDies
      } else if second_len < first_len {
        HeadOnOutcome::SecondDies
      } else {
        HeadOnOutcome::Neither
      }
    }
  }
}
