mod root;
mod account;
mod agreement;
mod announce;
mod chat;
mod models;
mod run;
mod sessions;

pub use root::Cli;
