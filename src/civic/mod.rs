pub mod audit;
pub mod bill;
pub mod bill_index;
pub mod config;
pub mod context;
pub mod error_sink;
pub mod event;
pub mod ledger;
pub mod linker;
pub mod loader;
pub mod lock;
pub mod orphans;
pub mod paths;
pub mod pipeline;
pub mod record;
pub mod router;
pub mod sessions;
pub mod util;
pub mod vote_event;
pub mod warn;
