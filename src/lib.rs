//! pingmux - event-driven ICMP echo engine
//!
//! This library pings any number of IPv4 hosts concurrently over a single
//! raw socket. Each host runs its own probe/no-reply timer cycle on one
//! reactor task; replies are routed back to their host by a correlation
//! index carried in the request payload, and per-host round-trip statistics
//! are kept along the way.
//!
//! # Example
//!
//! ```no_run
//! use pingmux::{Session, SessionConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::builder().quiet(true).build()?;
//!     let session = Session::new(&tokio::runtime::Handle::current(), config)?;
//!
//!     session.add_host("one.one.one.one").await?;
//!     session.start_pinging(|reply| {
//!         println!("{} seq={} {}", reply.fqdn, reply.sequence, reply.status);
//!     })?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(3)).await;
//!     session.print_statistics();
//!     session.close(false).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod packet;
pub mod probe;
mod receiver;
mod registry;
mod scheduler;
pub mod session;
pub mod socket;
pub mod stats;

#[cfg(test)]
mod test_utils;

// Re-export core types for library users
pub use config::{SessionConfig, SessionConfigBuilder};
pub use dns::{NameResolver, ResolvedHost, SystemResolver};
pub use error::PingError;
pub use probe::{PingCallback, PingReply, PingStatus};
pub use scheduler::HostPhase;
pub use session::{HostSnapshot, Session, SessionHandle};
pub use socket::EchoTransport;
pub use stats::{HostReport, HostStatistics, RttSummary, SessionCounters};
