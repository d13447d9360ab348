//! # pincer — a fast two-pass TCP connect port scanner
//!
//! pincer answers one question for every (host, port) pair it is given:
//! does a TCP handshake succeed (`open`), get refused (`closed`), or go
//! unanswered (`filtered`/`timeout`)? It scans many hosts and ports
//! concurrently under a bounded worker pool, sweeps port-major so
//! high-value ports surface across the whole host set first, and re-probes
//! ambiguous timeouts once at a slower deadline.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use pincer::scanner::{ScanOptions, ScanSession};
//! use pincer::types::Port;
//!
//! #[tokio::main]
//! async fn main() {
//!     let targets = vec!["192.168.1.1".to_string()];
//!     let ports = vec![Port::new(22).unwrap(), Port::new(443).unwrap()];
//!
//!     let session = ScanSession::new(targets, ports, ScanOptions::default());
//!     let report = session.run().await;
//!
//!     for target in &report.targets {
//!         println!("{}: {:?}", target.target, target.open_ports);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Port and target parsing with newtype validation
//! - [`resolver`] - Caching DNS resolution
//! - [`scanner`] - The scan engine: probe, pool, ordering, orchestration
//! - [`services`] - Static port-to-service-name lookup
//! - [`output`] - Live event and report rendering
//! - [`cli`] - Command-line argument definitions

pub mod cli;
pub mod output;
pub mod resolver;
pub mod scanner;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use resolver::Resolver;
pub use scanner::{Probe, ProbeOutcome, ScanOptions, ScanReport, ScanSession, TcpProbe};
pub use types::{Port, PortSpec, TargetSpec};
