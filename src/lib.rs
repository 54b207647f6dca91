//! chatbridge: lets models on chat websites call local tools.
//!
//! The host page hands every intercepted request and response fragment to
//! the runtime. Requests get a capability prompt injected; responses are
//! reconstructed into model text and scanned for a tool-call marker. Calls
//! run through the local bridge service and their results are fed back into
//! the conversation as the next user message.
//!
//! # Quick start
//!
//! ```no_run
//! use chatbridge::bridge::BridgeClient;
//! use chatbridge::config::load_config;
//! use chatbridge::hook::stdio;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let loaded = load_config(None).unwrap();
//! let client = BridgeClient::new(&loaded.config.bridge);
//! let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//! stdio::serve(stdin, tokio::io::stdout(), loaded.config, Arc::new(client))
//!     .await
//!     .unwrap();
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod hook;
pub mod pipeline;
pub mod prompt;
pub mod runtime;
pub mod site;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod types;
