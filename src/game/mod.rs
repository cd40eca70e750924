pub mod arena;
pub mod bots;
pub mod collision;
pub mod constants;
pub mod effects;
pub mod events;
pub mod input;
pub mod math;
pub mod snake;
pub mod types;
