pub mod chatkit;
pub mod health;
