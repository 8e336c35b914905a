pub mod dry_run;
pub mod file_sync;
pub mod inspect;
pub mod install;
pub mod nodes;
pub mod primary;
pub mod proxy;
pub mod remove;
pub mod replication;
