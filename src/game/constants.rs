pub const MAP_SIZE: f64 = 5000.0;
pub const WALL_TOLERANCE: f64 = 10.0;

pub const TICK_MS: u64 = 33;
pub const BROADCAST_MS: u64 = 40;
pub const LEADERBOARD_EVERY_TICKS: u64 = 10;
pub const LEADERBOARD_SIZE: usize = 10;

pub const SNAKE_SPEED: f64 = 3.4;
pub const BOOST_SPEED: f64 = 6.2;
pub const SEG_SPACING: f64 = 12.0;
pub const INIT_LEN: usize = 8;
pub const BOT_INIT_LEN: usize = 48;

pub const WIDTH_MIN: f64 = 6.0;
pub const WIDTH_MAX: f64 = 28.0;
pub const WIDTH_PER_SEGMENT: f64 = 0.022;

pub const GROW_PER_ORB: u32 = 4;
pub const ORB_COUNT: usize = 800;
pub const GOLDEN_ORB_SEED_COUNT: usize = 12;
pub const MEGA_ORB_SEED_COUNT: usize = 4;
pub const ORB_HARD_CAP: usize = 4000;
pub const GOLDEN_ORB_CHANCE: f64 = 0.012;
pub const MEGA_ORB_CHANCE: f64 = 0.004;

// Boosting above this length sheds tail segments into orbs.
pub const BOOST_SHED_MIN_LEN: usize = 100;
pub const BOOST_SHED_CHANCE: f64 = 0.18;

pub const BODY_SKIP_SEGMENTS: usize = 4;
pub const BODY_FINE_SEGMENTS: usize = 25;
pub const BODY_RADIUS_SLACK: f64 = 5.0;

pub const POWER_UP_SEED_COUNT: usize = 14;
pub const POWER_UP_PICKUP_RADIUS: f64 = 45.0;
pub const POWER_UP_MARGIN: f64 = 600.0;
pub const POWER_UP_RESPAWN_BASE_MS: i64 = 6000;
pub const POWER_UP_RESPAWN_JITTER_MS: i64 = 10000;
pub const POWER_UP_RESPAWN_SCATTER: f64 = 400.0;

pub const PORTAL_RADIUS: f64 = 48.0;
pub const PORTAL_EXIT_OFFSET: f64 = 65.0;
pub const PORTAL_COOLDOWN_MS: i64 = 2000;
pub const PORTAL_LIFETIME_MS: i64 = 40000;
pub const PORTAL_MARGIN: f64 = 500.0;
pub const PORTAL_MIN_SEPARATION: f64 = 1000.0;
pub const PORTAL_FIRST_SPAWN_MS: i64 = 15000;
pub const PORTAL_RESPAWN_BASE_MS: i64 = 12000;
pub const PORTAL_RESPAWN_JITTER_MS: i64 = 18000;

pub const MAGNET_RADIUS: f64 = 320.0;
pub const MAGNET_PULL_SCALE: f64 = 500.0;
pub const MAGNET_PULL_CAP: f64 = 5.0;
pub const BOMB_RADIUS: f64 = 350.0;
pub const FREEZE_SPEED_FACTOR: f64 = 0.3;
pub const GROW_SEGMENTS: usize = 60;
pub const GROW_SCORE_BONUS: i64 = 40;
pub const SHRINK_KEEP_RATIO: f64 = 0.6;

pub const SPAWN_GRACE_MS: i64 = 3000;
pub const SPAWN_SCATTER_HUMAN: f64 = 1800.0;
pub const SPAWN_SCATTER_BOT: f64 = 1400.0;
pub const BOT_RESPAWN_NEAR_HUMAN: f64 = 900.0;
pub const BOT_RESPAWN_WALL_MARGIN: f64 = 400.0;

pub const LOOT_CAP: usize = 100;
pub const LOOT_JITTER: f64 = 50.0;
pub const LOOT_ORB_SIZE: f64 = 9.0;
pub const LOOT_ORB_VALUE: u32 = 2;
pub const KILL_SCORE_RATIO: f64 = 0.35;
pub const KILL_COIN_RATIO: f64 = 0.2;
pub const KILL_COIN_FLAT: i64 = 15;
pub const STREAK_BONUS_MIN: u32 = 3;
pub const STREAK_BONUS_COINS_PER: i64 = 12;
pub const KILL_FEED_LEN: usize = 8;

pub const BOT_COUNT: usize = 5;
pub const BOT_RESPAWN_BASE_MS: i64 = 1500;
pub const BOT_RESPAWN_JITTER_MS: i64 = 2500;
pub const BOT_WALL_MARGIN: f64 = 350.0;
pub const BOT_EVADE_RADIUS_SQ: f64 = 180.0 * 180.0;
pub const BOT_EVADE_SIZE_RATIO: f64 = 1.4;
pub const BOT_EVADE_BOOST_MIN_LEN: usize = INIT_LEN * 3;
pub const BOT_HUNT_RADIUS_SQ: f64 = 1000.0 * 1000.0;
pub const BOT_HUNT_RADIUS_HIGH_SQ: f64 = 1600.0 * 1600.0;
pub const BOT_HUNT_BOOST_RADIUS_SQ: f64 = 350.0 * 350.0;
pub const BOT_HUNT_BOOST_MIN_LEN: usize = INIT_LEN * 2;
pub const BOT_AMBUSH_MIN_RADIUS_SQ: f64 = 400.0 * 400.0;
pub const BOT_AMBUSH_LEAD: f64 = 60.0;
pub const BOT_POWER_UP_RADIUS_SQ: f64 = 400.0 * 400.0;
pub const BOT_POWER_UP_BOOST_RADIUS_SQ: f64 = 120.0 * 120.0;
pub const BOT_POWER_UP_SEEK_CHANCE: f64 = 0.55;
pub const BOT_ORB_RADIUS_SQ: f64 = 700.0 * 700.0;
pub const BOT_ORB_SCAN_LIMIT: usize = 240;
pub const BOT_GOLDEN_ORB_WEIGHT: f64 = 0.3;
pub const BOT_WANDER_BOOST_CHANCE: f64 = 0.08;
pub const BOT_STUCK_TICKS: u32 = 30;
pub const BOT_STUCK_EPSILON_SQ: f64 = 4.0;
pub const HUMAN_REMOVE_DELAY_MS: i64 = 1000;

pub const VIEW_RADIUS_SQ: f64 = 2600.0 * 2600.0;
pub const MAX_PLAYERS: usize = 50;
pub const THIN_SEGMENT_THRESHOLD: usize = 140;
pub const THIN_HEAD_KEEP: usize = 30;

pub const EVENT_AUTO_BASE_MS: i64 = 120000;
pub const EVENT_AUTO_JITTER_MS: i64 = 120000;
pub const EVENT_AUTO_DURATION_MS: i64 = 45000;
pub const EVENT_OWNER_DURATION_MS: i64 = 60000;

pub const OWNER_SKINS: [&str; 10] = [
  "rainbow_god", "void_lord", "galaxy_emperor", "neon_death", "chrome_divine",
  "arena_exclusive", "death_god", "cosmos", "blood_moon", "electric_god",
];

pub const ORB_COLOR_POOL: [&str; 18] = [
  "#ff2244", "#ff6600", "#ffdd00", "#44ff22", "#00ccff", "#aa44ff", "#ff44aa",
  "#00ffcc", "#ff9900", "#ffffff", "#00ff88", "#ff3366", "#66ffcc", "#ffaa00",
  "#aa00ff", "#ff55cc", "#55ffcc", "#ccff55",
];
pub const GOLDEN_ORB_COLOR: &str = "#ffdd00";
pub const MEGA_ORB_COLOR: &str = "#ff00ff";
pub const LOOT_ORB_COLOR: &str = "#ffaa33";
pub const PORTAL_COLOR: &str = "#a855f7";
