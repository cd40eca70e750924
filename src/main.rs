use axum::{
  extract::ws::{Message, WebSocket},
  extract::{Path, Query, State, WebSocketUpgrade},
  http::{HeaderMap, Method, StatusCode},
  response::IntoResponse,
  routing::{get, post},
  Json, Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod cosmetics;
mod game;
mod profile;
mod protocol;
mod shared;

use cosmetics::Catalog;
use game::arena::{Arena, ArenaConfig};
use profile::{AccountError, ProfileStore, ProfileUpdate};
use shared::time::now_millis;
use shared::tokens::{sign_session_token, verify_session_token, SessionTokenClaims};

const ADMIN_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Clone)]
struct AppState {
  arenas: DashMap<String, Arc<Arena>>,
  store: Arc<ProfileStore>,
  catalog: Arc<Catalog>,
  arena_config: ArenaConfig,
  profile_tx: mpsc::UnboundedSender<ProfileUpdate>,
  admin_key: Option<String>,
  token_secret: String,
}

#[derive(Debug, Serialize)]
struct OkResponse {
  ok: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
  ok: bool,
  error: String,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
  username: Option<String>,
  password: Option<String>,
  #[serde(rename = "displayName")]
  display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
  username: Option<String>,
  password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
  success: bool,
  account_id: String,
  display_name: String,
  token: String,
  profile: profile::ProfileSummary,
}

#[derive(Debug, Deserialize)]
struct ArenaQuery {
  arena: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdminAuthPayload {
  key: Option<String>,
}

#[derive(Debug, Serialize)]
struct AdminAuthResponse {
  success: bool,
  token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GiveCoinsPayload {
  name: Option<String>,
  amount: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminProfileEntry {
  name: String,
  online: bool,
  coins: i64,
  total_score: i64,
  total_kills: i64,
  games_played: i64,
  high_score: i64,
  current_length: usize,
  first_seen: i64,
  last_seen: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| {
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let default_path = base.join("data").join("profiles.db");
    format!("sqlite://{}", default_path.display())
  });
  ensure_db_dir(&database_url)?;

  let db = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(&database_url)
    .await?;
  sqlx::migrate!("./migrations").run(&db).await?;
  let store = Arc::new(ProfileStore::new(db));

  let catalog_path =
    env::var("COSMETICS_CATALOG").unwrap_or_else(|_| "cosmetics_catalog.json".to_string());
  let catalog = Arc::new(Catalog::load_or_default(&catalog_path));

  let (profile_tx, profile_rx) = mpsc::unbounded_channel();
  let sync_url = env::var("PROFILE_SYNC_URL").ok().filter(|url| !url.trim().is_empty());
  tokio::spawn(profile::run_profile_writer(
    Arc::clone(&store),
    profile_rx,
    sync_url,
  ));

  let arena_config = ArenaConfig {
    max_players: env::var("MAX_PLAYERS")
      .ok()
      .and_then(|value| value.parse().ok())
      .unwrap_or(game::constants::MAX_PLAYERS),
    bot_count: env::var("BOT_COUNT")
      .ok()
      .and_then(|value| value.parse().ok())
      .unwrap_or(game::constants::BOT_COUNT),
    broadcast_bots_always: env::var("BROADCAST_BOTS_ALWAYS")
      .map(|value| !matches!(value.as_str(), "0" | "false" | "FALSE"))
      .unwrap_or(true),
    owner_key: env::var("OWNER_KEY").ok().filter(|key| !key.trim().is_empty()),
  };

  let state = Arc::new(AppState {
    arenas: DashMap::new(),
    store,
    catalog,
    arena_config,
    profile_tx,
    admin_key: env::var("ADMIN_KEY").ok().filter(|key| !key.trim().is_empty()),
    token_secret: env::var("TOKEN_SECRET")
      .ok()
      .filter(|secret| !secret.trim().is_empty())
      .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
  });

  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods([Method::GET, Method::POST])
    .allow_headers(Any);

  let app: Router = Router::new()
    .route("/api/health", get(health))
    .route("/api/account/register", post(account_register))
    .route("/api/account/login", post(account_login))
    .route("/api/account/profile/:id", get(account_profile))
    .route("/api/leaderboard", get(leaderboard_get))
    .route("/api/stats", get(stats_get))
    .route("/api/admin/auth", post(admin_auth))
    .route("/api/admin/players", get(admin_players))
    .route("/api/admin/give-coins", post(admin_give_coins))
    .route("/api/arena/:arena", get(ws_handler))
    .layer(cors)
    .with_state(state);

  let port: u16 = env::var("PORT")
    .ok()
    .and_then(|value| value.parse().ok())
    .unwrap_or(8787);

  let address = format!("0.0.0.0:{port}");
  tracing::info!("listening on {address}");

  let listener = tokio::net::TcpListener::bind(&address).await?;
  axum::serve(listener, app).await?;

  Ok(())
}

impl AppState {
  fn arena(&self, name: String) -> Arc<Arena> {
    match self.arenas.entry(name) {
      dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
      dashmap::mapref::entry::Entry::Vacant(entry) => {
        let arena = Arc::new(Arena::new(
          self.arena_config.clone(),
          Arc::clone(&self.store),
          Arc::clone(&self.catalog),
          self.profile_tx.clone(),
        ));
        entry.insert(arena.clone());
        arena
      }
    }
  }

  fn existing_arena(&self, name: &str) -> Option<Arc<Arena>> {
    self.arenas.get(name).map(|entry| entry.clone())
  }

  fn is_admin(&self, headers: &HeaderMap) -> bool {
    let Some(admin_key) = &self.admin_key else { return false };
    let Some(supplied) = headers.get("x-admin-key").and_then(|value| value.to_str().ok()) else {
      return false;
    };
    if supplied == admin_key {
      return true;
    }
    verify_session_token(supplied, &self.token_secret, now_millis())
      .is_some_and(|claims| claims.subject == "admin")
  }
}

fn ensure_db_dir(database_url: &str) -> anyhow::Result<()> {
  if database_url.starts_with("sqlite::memory:") {
    return Ok(());
  }
  let path = database_url
    .strip_prefix("sqlite://")
    .or_else(|| database_url.strip_prefix("sqlite:"));
  let Some(path) = path else { return Ok(()) };
  if path.is_empty() || path == ":memory:" {
    return Ok(());
  }
  let db_path = PathBuf::from(path);
  if let Some(parent) = db_path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  if !db_path.exists() {
    let _ = std::fs::File::create(&db_path)?;
  }
  Ok(())
}

async fn health() -> impl IntoResponse {
  Json(OkResponse { ok: true })
}

async fn account_register(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<RegisterPayload>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
  let Ok(Json(payload)) = payload else {
    return (
      StatusCode::BAD_REQUEST,
      Json(ErrorResponse { ok: false, error: "Invalid JSON".to_string() }),
    )
      .into_response();
  };
  let (Some(username), Some(password), Some(display_name)) =
    (payload.username, payload.password, payload.display_name)
  else {
    return (
      StatusCode::BAD_REQUEST,
      Json(ErrorResponse { ok: false, error: "All fields required.".to_string() }),
    )
      .into_response();
  };

  match state
    .store
    .register_account(&username, &password, &display_name, &state.token_secret)
    .await
  {
    Ok(Ok(session)) => (
      StatusCode::OK,
      Json(AccountResponse {
        success: true,
        account_id: session.account_id,
        display_name: session.display_name,
        token: session.token,
        profile: session.profile.summary(),
      }),
    )
      .into_response(),
    Ok(Err(AccountError::UsernameTaken)) => (
      StatusCode::CONFLICT,
      Json(ErrorResponse { ok: false, error: "Username taken.".to_string() }),
    )
      .into_response(),
    Ok(Err(AccountError::Invalid(reason))) => (
      StatusCode::BAD_REQUEST,
      Json(ErrorResponse { ok: false, error: reason.to_string() }),
    )
      .into_response(),
    Ok(Err(AccountError::BadCredentials)) | Err(_) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ErrorResponse { ok: false, error: "Registration failed.".to_string() }),
    )
      .into_response(),
  }
}

async fn account_login(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<LoginPayload>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
  let Ok(Json(payload)) = payload else {
    return (
      StatusCode::BAD_REQUEST,
      Json(ErrorResponse { ok: false, error: "Invalid JSON".to_string() }),
    )
      .into_response();
  };
  let (Some(username), Some(password)) = (payload.username, payload.password) else {
    return (
      StatusCode::BAD_REQUEST,
      Json(ErrorResponse { ok: false, error: "Username and password required.".to_string() }),
    )
      .into_response();
  };

  match state
    .store
    .login_account(&username, &password, &state.token_secret)
    .await
  {
    Ok(Ok(session)) => (
      StatusCode::OK,
      Json(AccountResponse {
        success: true,
        account_id: session.account_id,
        display_name: session.display_name,
        token: session.token,
        profile: session.profile.summary(),
      }),
    )
      .into_response(),
    Ok(Err(_)) => (
      StatusCode::UNAUTHORIZED,
      Json(ErrorResponse { ok: false, error: "Wrong username or password.".to_string() }),
    )
      .into_response(),
    Err(_) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ErrorResponse { ok: false, error: "Login failed.".to_string() }),
    )
      .into_response(),
  }
}

async fn account_profile(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> impl IntoResponse {
  match state.store.fetch(&id).await {
    Ok(Some(profile)) => (StatusCode::OK, Json(profile.summary())).into_response(),
    Ok(None) => (
      StatusCode::NOT_FOUND,
      Json(ErrorResponse { ok: false, error: "Not found.".to_string() }),
    )
      .into_response(),
    Err(_) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(ErrorResponse { ok: false, error: "Profile lookup failed.".to_string() }),
    )
      .into_response(),
  }
}

async fn leaderboard_get(
  State(state): State<Arc<AppState>>,
  Query(params): Query<ArenaQuery>,
) -> impl IntoResponse {
  let arena_name = params.arena.unwrap_or_else(|| "main".to_string());
  match state.existing_arena(&arena_name) {
    Some(arena) => (StatusCode::OK, Json(arena.leaderboard().await)).into_response(),
    None => (StatusCode::OK, Json(Vec::<game::types::LeaderboardEntry>::new())).into_response(),
  }
}

async fn stats_get(
  State(state): State<Arc<AppState>>,
  Query(params): Query<ArenaQuery>,
) -> impl IntoResponse {
  let arena_name = params.arena.unwrap_or_else(|| "main".to_string());
  match state.existing_arena(&arena_name) {
    Some(arena) => (StatusCode::OK, Json(arena.stats().await)).into_response(),
    None => (
      StatusCode::NOT_FOUND,
      Json(ErrorResponse { ok: false, error: "No such arena.".to_string() }),
    )
      .into_response(),
  }
}

async fn admin_auth(
  State(state): State<Arc<AppState>>,
  payload: Result<Json<AdminAuthPayload>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
  let supplied = payload
    .ok()
    .and_then(|Json(payload)| payload.key)
    .unwrap_or_default();
  let success = state
    .admin_key
    .as_deref()
    .is_some_and(|expected| expected == supplied);
  let token = if success {
    sign_session_token(
      &SessionTokenClaims {
        subject: "admin".to_string(),
        expires_at_ms: now_millis() + ADMIN_TOKEN_TTL_MS,
      },
      &state.token_secret,
    )
    .ok()
  } else {
    None
  };
  Json(AdminAuthResponse { success, token })
}

async fn admin_players(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
) -> impl IntoResponse {
  if !state.is_admin(&headers) {
    return (
      StatusCode::UNAUTHORIZED,
      Json(ErrorResponse { ok: false, error: "Unauthorized".to_string() }),
    )
      .into_response();
  }

  let profiles = match state.store.list_all().await {
    Ok(profiles) => profiles,
    Err(_) => {
      return (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { ok: false, error: "Profile listing failed.".to_string() }),
      )
        .into_response();
    }
  };

  // Overlay the live arena state onto the persisted profiles. Arena handles
  // are cloned out first so no map guard is held across an await.
  let arenas: Vec<Arc<Arena>> = state.arenas.iter().map(|entry| entry.value().clone()).collect();
  let mut live: HashMap<String, (i64, usize)> = HashMap::new();
  for arena in arenas {
    for player in arena.player_entries().await {
      if !player.is_bot {
        live.insert(player.name.to_lowercase(), (player.session_coins, player.length));
      }
    }
  }

  let entries: Vec<AdminProfileEntry> = profiles
    .into_iter()
    .map(|profile| {
      let overlay = live.get(&profile.name.to_lowercase());
      AdminProfileEntry {
        online: overlay.is_some(),
        coins: profile.coins + overlay.map_or(0, |(coins, _)| *coins),
        current_length: overlay.map_or(0, |(_, length)| *length),
        name: profile.name,
        total_score: profile.total_score,
        total_kills: profile.total_kills,
        games_played: profile.games_played,
        high_score: profile.high_score,
        first_seen: profile.first_seen,
        last_seen: profile.last_seen,
      }
    })
    .collect();

  (StatusCode::OK, Json(entries)).into_response()
}

async fn admin_give_coins(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  payload: Result<Json<GiveCoinsPayload>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
  if !state.is_admin(&headers) {
    return (
      StatusCode::UNAUTHORIZED,
      Json(ErrorResponse { ok: false, error: "Unauthorized".to_string() }),
    )
      .into_response();
  }
  let Ok(Json(payload)) = payload else {
    return (
      StatusCode::BAD_REQUEST,
      Json(ErrorResponse { ok: false, error: "Invalid JSON".to_string() }),
    )
      .into_response();
  };
  let name = payload.name.unwrap_or_default();
  let amount = payload.amount.unwrap_or(0);

  let profile = match state.store.find_by_name(&name).await {
    Ok(Some(profile)) => profile,
    Ok(None) => {
      return (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse { ok: false, error: "Not found".to_string() }),
      )
        .into_response();
    }
    Err(_) => {
      return (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { ok: false, error: "Lookup failed.".to_string() }),
      )
        .into_response();
    }
  };

  let new_balance = match state.store.add_coins(&profile.id, amount).await {
    Ok(balance) => balance,
    Err(_) => {
      return (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { ok: false, error: "Grant failed.".to_string() }),
      )
        .into_response();
    }
  };

  let arenas: Vec<Arc<Arena>> = state.arenas.iter().map(|entry| entry.value().clone()).collect();
  for arena in arenas {
    if arena.notify_coins_granted(&name, amount, new_balance).await {
      break;
    }
  }

  (StatusCode::OK, Json(OkResponse { ok: true })).into_response()
}

async fn ws_handler(
  ws: WebSocketUpgrade,
  Path(arena): Path<String>,
  State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
  let trimmed = arena.trim();
  let arena_name = if trimmed.is_empty() { "main" } else { trimmed }.to_string();
  let arena = state.arena(arena_name);
  ws.on_upgrade(move |socket| handle_socket(socket, arena))
}

async fn handle_socket(socket: WebSocket, arena: Arc<Arena>) {
  let (mut sender, mut receiver) = socket.split();
  let (tx, mut rx) = mpsc::unbounded_channel::<String>();
  let session_id = arena.add_session(tx).await;

  let send_task = tokio::spawn(async move {
    while let Some(payload) = rx.recv().await {
      if sender.send(Message::Text(payload)).await.is_err() {
        break;
      }
    }
  });

  while let Some(result) = receiver.next().await {
    let Ok(message) = result else { break };
    match message {
      Message::Text(text) => {
        arena.handle_text_message(&session_id, &text).await;
      }
      Message::Close(_) => break,
      _ => {}
    }
  }

  arena.remove_session(&session_id).await;
  send_task.abort();
}
