use super::*;
use crate::game::constants::{LEADERBOARD_SIZE, THIN_HEAD_KEEP, THIN_SEGMENT_THRESHOLD};
use crate::game::types::LeaderboardEntry;
use crate::protocol::{ActiveEffect, SnakeState};

impl ArenaState {
  /// Long bodies are thinned before transmission: full resolution near the
  /// head, every other segment beyond, which bounds payload size no matter
  /// how long the snake gets.
  pub(super) fn thin_segments(segments: &[Vec2]) -> Vec<Vec2> {
    if segments.len() <= THIN_SEGMENT_THRESHOLD {
      return segments.to_vec();
    }
    segments
      .iter()
      .enumerate()
      .filter(|(index, _)| *index < THIN_HEAD_KEEP || index % 2 == 0)
      .map(|(_, segment)| *segment)
      .collect()
  }

  pub(super) fn snake_state(snake: &Snake, now: i64) -> SnakeState {
    SnakeState {
      segments: Self::thin_segments(&snake.segments),
      heading: snake.heading,
      skin: snake.skin.clone(),
      granted_skin: snake.granted_skin.clone(),
      name: snake.name.clone(),
      width: snake.width,
      boosting: snake.boosting,
      is_owner: snake.is_owner,
      is_bot: snake.is_bot(),
      equipped_trail: snake.equipped_trail.clone(),
      equipped_title: snake.equipped_title.clone(),
      equipped_badge: snake.equipped_badge.clone(),
      active_effects: snake
        .effects
        .iter()
        .map(|(kind, instance)| ActiveEffect { kind: *kind, until: instance.until })
        .collect(),
      ghost: snake.has_effect(EffectKind::Ghost),
      shield: snake.has_effect(EffectKind::Shield),
      kill_streak: snake.kill_streak,
      score: snake.score,
      raging: snake.has_effect(EffectKind::Rage),
      in_grace: snake.in_grace(now),
    }
  }

  /// One snapshot per connected observer: own full state plus every live
  /// snake within view range of the observer's head. Bot inclusion beyond
  /// the radius is a deployment choice.
  pub(super) fn broadcast_snapshots(&mut self, now: i64) {
    let mut outgoing: Vec<(String, String)> = Vec::new();
    for (session_id, session) in &self.sessions {
      let Some(snake_id) = session.snake_id.as_deref() else { continue };
      let Some(me) = self.snakes.get(snake_id) else { continue };
      if !me.alive {
        continue;
      }
      let Some(my_head) = me.head() else { continue };

      let mut players = HashMap::new();
      players.insert(me.id.clone(), Self::snake_state(me, now));
      for other in self.snakes.values() {
        if other.id == me.id || !other.alive {
          continue;
        }
        let include = (other.is_bot() && self.config.broadcast_bots_always)
          || other
            .head()
            .is_some_and(|head| dist_sq(my_head, head) <= VIEW_RADIUS_SQ);
        if include {
          players.insert(other.id.clone(), Self::snake_state(other, now));
        }
      }

      let message = ServerMessage::State {
        players,
        leaderboard: self.leaderboard.clone(),
        active_event: self.active_event.clone(),
        power_ups: self.power_ups.values().cloned().collect(),
        portals: self.portals.values().cloned().collect(),
        my_coins: me.session_coins,
      };
      outgoing.push((session_id.clone(), message.encode()));
    }

    let mut stale = Vec::new();
    for (session_id, payload) in outgoing {
      let Some(session) = self.sessions.get(&session_id) else { continue };
      if session.sender.send(payload).is_err() {
        stale.push(session_id);
      }
    }
    let now = now_millis();
    for session_id in stale {
      self.disconnect_session(&session_id, now);
    }
  }

  pub(super) fn recompute_leaderboard(&mut self) {
    let mut live: Vec<&Snake> = self.snakes.values().filter(|snake| snake.alive).collect();
    live.sort_by(|a, b| b.len().cmp(&a.len()));
    self.leaderboard = live
      .into_iter()
      .take(LEADERBOARD_SIZE)
      .enumerate()
      .map(|(index, snake)| LeaderboardEntry {
        rank: index + 1,
        id: snake.id.clone(),
        name: snake.name.clone(),
        length: snake.len(),
        score: snake.score,
        skin: snake.skin.clone(),
        is_owner: snake.is_owner,
        is_bot: snake.is_bot(),
        equipped_title: snake.equipped_title.clone(),
        equipped_badge: snake.equipped_badge.clone(),
        kill_streak: snake.kill_streak,
      })
      .collect();
  }
}
