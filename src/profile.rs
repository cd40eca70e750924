use crate::shared::time::now_millis;
use crate::shared::tokens::{hash_password, sign_session_token, SessionTokenClaims};
use anyhow::Context;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const STARTING_COINS: i64 = 750;
pub const SESSION_TOKEN_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
  pub coins: i64,
  pub total_score: i64,
  pub total_kills: i64,
  pub games_played: i64,
  pub high_score: i64,
  pub unlocked_cosmetics: Vec<String>,
  pub equipped_trail: Option<String>,
  pub equipped_title: Option<String>,
  pub equipped_badge: Option<String>,
  pub is_guest: bool,
}

#[derive(Debug, Clone)]
pub struct Profile {
  pub id: String,
  pub name: String,
  pub coins: i64,
  pub total_score: i64,
  pub total_kills: i64,
  pub games_played: i64,
  pub high_score: i64,
  pub unlocked_cosmetics: Vec<String>,
  pub equipped_trail: Option<String>,
  pub equipped_title: Option<String>,
  pub equipped_badge: Option<String>,
  pub first_seen: i64,
  pub last_seen: i64,
}

impl Profile {
  pub fn is_guest(&self) -> bool {
    self.id.starts_with("guest:")
  }

  pub fn summary(&self) -> ProfileSummary {
    ProfileSummary {
      coins: self.coins,
      total_score: self.total_score,
      total_kills: self.total_kills,
      games_played: self.games_played,
      high_score: self.high_score,
      unlocked_cosmetics: self.unlocked_cosmetics.clone(),
      equipped_trail: self.equipped_trail.clone(),
      equipped_title: self.equipped_title.clone(),
      equipped_badge: self.equipped_badge.clone(),
      is_guest: self.is_guest(),
    }
  }
}

pub fn guest_key(name: &str) -> String {
  format!("guest:{}", name.trim().to_lowercase())
}

/// Profile mutations emitted by the simulation tick. They cross into the
/// async world through a channel so the tick never waits on the database.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProfileUpdate {
  #[serde(rename_all = "camelCase")]
  LifeFlush {
    key: String,
    name: String,
    score: i64,
    coins: i64,
  },
  #[serde(rename_all = "camelCase")]
  KillRecorded { key: String },
  #[serde(rename_all = "camelCase")]
  CoinsGranted { key: String, amount: i64 },
}

#[derive(Debug)]
pub enum AccountError {
  Invalid(&'static str),
  UsernameTaken,
  BadCredentials,
}

#[derive(Debug, Clone)]
pub struct AccountSession {
  pub account_id: String,
  pub display_name: String,
  pub token: String,
  pub profile: Profile,
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
  db: SqlitePool,
}

impl ProfileStore {
  pub fn new(db: SqlitePool) -> Self {
    Self { db }
  }

  pub async fn fetch(&self, id: &str) -> anyhow::Result<Option<Profile>> {
    let row = sqlx::query("SELECT * FROM profiles WHERE id = ?")
      .bind(id)
      .fetch_optional(&self.db)
      .await
      .context("profile lookup failed")?;
    Ok(row.map(profile_from_row))
  }

  pub async fn get_or_create(&self, key: &str, name: &str) -> anyhow::Result<Profile> {
    let now = now_millis();
    if let Some(existing) = self.fetch(key).await? {
      let name = if name.is_empty() { existing.name.clone() } else { name.to_string() };
      sqlx::query("UPDATE profiles SET name = ?, last_seen = ? WHERE id = ?")
        .bind(&name)
        .bind(now)
        .bind(key)
        .execute(&self.db)
        .await
        .context("profile touch failed")?;
      return Ok(Profile { name, last_seen: now, ..existing });
    }

    let name = if name.is_empty() { "Snake" } else { name };
    sqlx::query(
      "INSERT INTO profiles (id, name, coins, first_seen, last_seen) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(key)
    .bind(name)
    .bind(STARTING_COINS)
    .bind(now)
    .bind(now)
    .execute(&self.db)
    .await
    .context("profile insert failed")?;
    self
      .fetch(key)
      .await?
      .context("freshly inserted profile missing")
  }

  /// End-of-life flush: in-round score and coins fold into the lifetime
  /// totals, exactly once per life.
  pub async fn flush_life(&self, key: &str, name: &str, score: i64, coins: i64) -> anyhow::Result<()> {
    self.get_or_create(key, name).await?;
    sqlx::query(
      "UPDATE profiles SET total_score = total_score + ?, coins = coins + ?, \
       games_played = games_played + 1, high_score = MAX(high_score, ?), last_seen = ? \
       WHERE id = ?",
    )
    .bind(score)
    .bind(coins)
    .bind(score)
    .bind(now_millis())
    .bind(key)
    .execute(&self.db)
    .await
    .context("life flush failed")?;
    Ok(())
  }

  pub async fn record_kill(&self, key: &str) -> anyhow::Result<()> {
    sqlx::query("UPDATE profiles SET total_kills = total_kills + 1 WHERE id = ?")
      .bind(key)
      .execute(&self.db)
      .await
      .context("kill record failed")?;
    Ok(())
  }

  pub async fn add_coins(&self, key: &str, amount: i64) -> anyhow::Result<i64> {
    sqlx::query("UPDATE profiles SET coins = coins + ? WHERE id = ?")
      .bind(amount)
      .bind(key)
      .execute(&self.db)
      .await
      .context("coin grant failed")?;
    let profile = self.fetch(key).await?.context("profile missing after grant")?;
    Ok(profile.coins)
  }

  /// Returns false without side effects when the balance is short.
  pub async fn spend_coins(&self, key: &str, amount: i64) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE profiles SET coins = coins - ? WHERE id = ? AND coins >= ?")
      .bind(amount)
      .bind(key)
      .bind(amount)
      .execute(&self.db)
      .await
      .context("coin spend failed")?;
    Ok(result.rows_affected() > 0)
  }

  pub async fn unlock_cosmetic(&self, key: &str, cosmetic_id: &str) -> anyhow::Result<Vec<String>> {
    let profile = self.fetch(key).await?.context("profile missing for unlock")?;
    let mut unlocked = profile.unlocked_cosmetics;
    if !unlocked.iter().any(|id| id == cosmetic_id) {
      unlocked.push(cosmetic_id.to_string());
      let encoded = serde_json::to_string(&unlocked).context("unlock list encode failed")?;
      sqlx::query("UPDATE profiles SET unlocked_cosmetics = ? WHERE id = ?")
        .bind(encoded)
        .bind(key)
        .execute(&self.db)
        .await
        .context("unlock update failed")?;
    }
    Ok(unlocked)
  }

  pub async fn set_equipped(
    &self,
    key: &str,
    slot: &str,
    value: Option<&str>,
  ) -> anyhow::Result<()> {
    let column = match slot {
      "trail" => "equipped_trail",
      "title" => "equipped_title",
      "badge" => "equipped_badge",
      _ => return Ok(()),
    };
    let sql = format!("UPDATE profiles SET {column} = ? WHERE id = ?");
    sqlx::query(&sql)
      .bind(value)
      .bind(key)
      .execute(&self.db)
      .await
      .context("equip update failed")?;
    Ok(())
  }

  pub async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<Profile>> {
    let row = sqlx::query("SELECT * FROM profiles WHERE LOWER(name) = LOWER(?) LIMIT 1")
      .bind(name)
      .fetch_optional(&self.db)
      .await
      .context("profile name lookup failed")?;
    Ok(row.map(profile_from_row))
  }

  pub async fn list_all(&self) -> anyhow::Result<Vec<Profile>> {
    let rows = sqlx::query("SELECT * FROM profiles ORDER BY last_seen DESC")
      .fetch_all(&self.db)
      .await
      .context("profile listing failed")?;
    Ok(rows.into_iter().map(profile_from_row).collect())
  }

  pub async fn apply(&self, update: &ProfileUpdate) -> anyhow::Result<()> {
    match update {
      ProfileUpdate::LifeFlush { key, name, score, coins } => {
        self.flush_life(key, name, *score, *coins).await
      }
      ProfileUpdate::KillRecorded { key } => self.record_kill(key).await,
      ProfileUpdate::CoinsGranted { key, amount } => {
        self.add_coins(key, *amount).await.map(|_| ())
      }
    }
  }

  pub async fn register_account(
    &self,
    username: &str,
    password: &str,
    display_name: &str,
    token_secret: &str,
  ) -> anyhow::Result<Result<AccountSession, AccountError>> {
    let username = username.trim();
    let display_name = display_name.trim();
    if username.len() < 3 || username.len() > 20 {
      return Ok(Err(AccountError::Invalid("Username must be 3-20 characters.")));
    }
    if password.len() < 6 {
      return Ok(Err(AccountError::Invalid("Password must be at least 6 characters.")));
    }
    if display_name.len() < 2 || display_name.len() > 20 {
      return Ok(Err(AccountError::Invalid("Display name must be 2-20 characters.")));
    }

    let key = username.to_lowercase();
    let existing = sqlx::query("SELECT username FROM accounts WHERE username = ?")
      .bind(&key)
      .fetch_optional(&self.db)
      .await
      .context("account lookup failed")?;
    if existing.is_some() {
      return Ok(Err(AccountError::UsernameTaken));
    }

    let account_id = format!("acc_{}", Uuid::new_v4());
    let now = now_millis();
    sqlx::query(
      "INSERT INTO accounts (username, account_id, display_name, password_hash, created_at, last_login) \
       VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&key)
    .bind(&account_id)
    .bind(display_name)
    .bind(hash_password(&key, password))
    .bind(now)
    .bind(now)
    .execute(&self.db)
    .await
    .context("account insert failed")?;

    let profile = self.get_or_create(&account_id, display_name).await?;
    let token = self.session_token(&account_id, token_secret)?;
    Ok(Ok(AccountSession {
      account_id,
      display_name: display_name.to_string(),
      token,
      profile,
    }))
  }

  pub async fn login_account(
    &self,
    username: &str,
    password: &str,
    token_secret: &str,
  ) -> anyhow::Result<Result<AccountSession, AccountError>> {
    let key = username.trim().to_lowercase();
    let row = sqlx::query("SELECT account_id, display_name, password_hash FROM accounts WHERE username = ?")
      .bind(&key)
      .fetch_optional(&self.db)
      .await
      .context("account lookup failed")?;
    let Some(row) = row else {
      return Ok(Err(AccountError::BadCredentials));
    };

    let stored_hash: String = row.try_get("password_hash").unwrap_or_default();
    if stored_hash != hash_password(&key, password) {
      return Ok(Err(AccountError::BadCredentials));
    }

    let account_id: String = row.try_get("account_id").context("account row malformed")?;
    let display_name: String = row.try_get("display_name").unwrap_or_default();
    sqlx::query("UPDATE accounts SET last_login = ? WHERE username = ?")
      .bind(now_millis())
      .bind(&key)
      .execute(&self.db)
      .await
      .context("login touch failed")?;

    let profile = self.get_or_create(&account_id, &display_name).await?;
    let token = self.session_token(&account_id, token_secret)?;
    Ok(Ok(AccountSession {
      account_id,
      display_name,
      token,
      profile,
    }))
  }

  fn session_token(&self, account_id: &str, secret: &str) -> anyhow::Result<String> {
    sign_session_token(
      &SessionTokenClaims {
        subject: account_id.to_string(),
        expires_at_ms: now_millis() + SESSION_TOKEN_TTL_MS,
      },
      secret,
    )
  }
}

fn profile_from_row(row: sqlx::sqlite::SqliteRow) -> Profile {
  let unlocked_raw: String = row.try_get("unlocked_cosmetics").unwrap_or_default();
  let unlocked_cosmetics: Vec<String> =
    serde_json::from_str(&unlocked_raw).unwrap_or_else(|_| vec!["title_rookie".to_string()]);
  Profile {
    id: row.try_get("id").unwrap_or_default(),
    name: row.try_get("name").unwrap_or_default(),
    coins: row.try_get("coins").unwrap_or(0),
    total_score: row.try_get("total_score").unwrap_or(0),
    total_kills: row.try_get("total_kills").unwrap_or(0),
    games_played: row.try_get("games_played").unwrap_or(0),
    high_score: row.try_get("high_score").unwrap_or(0),
    unlocked_cosmetics,
    equipped_trail: row.try_get::<Option<String>, _>("equipped_trail").ok().flatten(),
    equipped_title: row.try_get::<Option<String>, _>("equipped_title").ok().flatten(),
    equipped_badge: row.try_get::<Option<String>, _>("equipped_badge").ok().flatten(),
    first_seen: row.try_get("first_seen").unwrap_or(0),
    last_seen: row.try_get("last_seen").unwrap_or(0),
  }
}

/// Drains tick-originated profile updates into the store, mirroring each one
/// to the external progression backend when a sync URL is configured.
pub async fn run_profile_writer(
  store: Arc<ProfileStore>,
  mut rx: UnboundedReceiver<ProfileUpdate>,
  sync_url: Option<String>,
) {
  let client = sync_url.as_ref().map(|_| reqwest::Client::new());
  while let Some(update) = rx.recv().await {
    if let Err(error) = store.apply(&update).await {
      tracing::warn!(?error, "profile update failed");
    }
    if let (Some(url), Some(client)) = (&sync_url, &client) {
      if let Err(error) = client.post(url).json(&update).send().await {
        tracing::warn!(?error, "progression backend sync failed");
      }
    }
  }
}
