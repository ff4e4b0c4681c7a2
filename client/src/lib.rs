//! Off-chain client for the token presale program: derives program addresses,
//! reads and validates presale state, runs the mutating actions and keeps the
//! REST mirror in step with the chain.

pub mod actions;
pub mod amount;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod mirror;
pub mod navigation;
pub mod outbox;
pub mod pda;
pub mod price;
mod read;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod snapshot;
pub mod view;
pub mod window;

pub use actions::{NewPresale, TxOutcome};
pub use client::PresaleClient;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use gate::ActionPhase;
pub use mirror::{AssetKind, HttpMirror, MirrorApi};
pub use navigation::{Navigator, NoNavigation, Route};
pub use price::{CoinGecko, PriceIndex};
pub use rpc::{ChainRpc, SolanaRpc};
pub use snapshot::PresaleSnapshot;
pub use view::LocalViewState;
