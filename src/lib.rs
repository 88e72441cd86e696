pub mod agent;
pub mod ai;
pub mod bot;
pub mod config;
pub mod db;
pub mod followup;
pub mod messenger;
