pub mod chatkit;
pub mod descriptions;
pub mod widgets;
pub mod workflow;
