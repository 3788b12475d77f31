//! Light effects: colour themes and the per-device animation scheduler

pub mod scheduler;
pub mod theme;

pub use scheduler::{EffectScheduler, JobInfo};
pub use theme::{HIGH_LEVEL, Hsv, LOW_LEVEL, MAX_LEVEL, STEADY_LEVEL, Theme};
