use super::constants::{
  BOOST_SPEED, FREEZE_SPEED_FACTOR, INIT_LEN, SEG_SPACING, WIDTH_MAX, WIDTH_MIN,
  WIDTH_PER_SEGMENT,
};
use super::effects::EffectKind;
use super::math::clamp;
use super::types::{Snake, Vec2};

pub fn make_segments(origin: Vec2, len: usize) -> Vec<Vec2> {
  (0..len)
    .map(|index| Vec2 {
      x: origin.x - index as f64 * SEG_SPACING,
      y: origin.y,
    })
    .collect()
}

/// Width is a pure function of current length, clamped to [WIDTH_MIN, WIDTH_MAX].
pub fn width_for_len(len: usize) -> f64 {
  clamp(WIDTH_MIN + len as f64 * WIDTH_PER_SEGMENT, WIDTH_MIN, WIDTH_MAX)
}

/// Effective speed for this tick: freeze beats everything, then the boost
/// override, then the base speed scaled by the active effect multiplier.
pub fn effective_speed(snake: &Snake) -> f64 {
  if snake.has_effect(EffectKind::Frozen) {
    return snake.base_speed * FREEZE_SPEED_FACTOR;
  }
  if snake.boosting {
    return BOOST_SPEED;
  }
  snake.base_speed * snake.speed_multiplier
}

/// One movement step: unshift a new head along the heading, then either burn
/// one unit of grow buffer (net +1 segment) or pop the tail (net 0). Width is
/// recomputed afterwards, never carried stale.
pub fn advance(snake: &mut Snake, speed: f64) {
  let Some(head) = snake.head() else { return };
  snake.segments.insert(
    0,
    Vec2 {
      x: head.x + snake.heading.cos() * speed,
      y: head.y + snake.heading.sin() * speed,
    },
  );
  if snake.grow_buffer > 0 {
    snake.grow_buffer -= 1;
  } else {
    snake.segments.pop();
  }
  snake.width = width_for_len(snake.len());
}

/// Instant growth: appends `extra` copies of the tail position. The copies
/// fan out naturally as the snake moves.
pub fn inflate(snake: &mut Snake, extra: usize) {
  let Some(tail) = snake.segments.last().copied() else { return };
  snake.segments.extend(std::iter::repeat(tail).take(extra));
  snake.width = width_for_len(snake.len());
}

/// Truncates to `keep` segments, never below the starting length.
pub fn truncate_to(snake: &mut Snake, keep: usize) {
  let keep = keep.max(INIT_LEN);
  if snake.len() > keep {
    snake.segments.truncate(keep);
    snake.width = width_for_len(snake.len());
  }
}
