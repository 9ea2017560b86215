pub mod config;
pub mod reminder;
pub mod run;
