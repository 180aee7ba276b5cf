pub mod accept_tasks;
pub mod config;
pub mod startup;
pub mod state;
