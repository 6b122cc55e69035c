pub mod attention;
pub mod auth;
pub mod core;
pub mod courses;
pub mod materials;
pub mod pomodoro;
pub mod reports;

mod shared;
