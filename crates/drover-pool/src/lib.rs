//! drover-pool: the offer pool.
//!
//! Incoming resource offers are validated, scored against their agent's
//! total capacity, and enriched with attributes, then kept in descending
//! score order until a scheduler claims them, they expire, or their host is
//! lost. Every offer that leaves the pool without being used is declined
//! back to the resource manager exactly once.
//!
//! ```no_run
//! # async fn demo(
//! #     client: std::sync::Arc<dyn drover_core::SchedulerClient>,
//! #     store: std::sync::Arc<dyn drover_core::Store>,
//! # ) {
//! use drover_core::DroverConfig;
//! use drover_pool::OfferPool;
//!
//! let pool = OfferPool::start(&DroverConfig::default(), client, store);
//! let mut cursor = pool.get_first_offer().await;
//! while let Some(offer) = cursor {
//!     if pool.use_offer(&offer).await {
//!         break;
//!     }
//!     cursor = pool.get_next_offer(&offer).await;
//! }
//! pool.stop().await;
//! # }
//! ```

mod enrich;
pub mod error;
mod list;
mod lost;
mod pool;

pub use error::{PoolError, PoolResult};
pub use list::Offer;
pub use pool::OfferPool;
