//! # pairterm
//!
//! A terminal pair-programming agent: a conversational loop in which an LLM
//! drives a fixed set of local tools (file I/O, search, shell execution,
//! version control) while a human supervises risky actions.
//!
//! ## Architecture
//!
//! ```text
//!        ┌────────────────────────────────────┐
//!        │              Session               │
//!        │  (provider ⇄ tool-call loop)       │
//!        └───┬─────────┬──────────┬───────────┘
//!            │         │          │
//!            ▼         ▼          ▼
//!     ┌──────────┐ ┌────────┐ ┌─────────────┐
//!     │ Approval │ │  Tool  │ │   Context   │
//!     │   Gate   │ │Registry│ │   Window    │
//!     └──────────┘ └───┬────┘ └─────────────┘
//!                      │
//!            ┌─────────┴──────────┐
//!            ▼                    ▼
//!     ┌─────────────┐      ┌─────────────┐
//!     │  Process    │      │  Anthropic  │
//!     │  Table      │      │  Client     │──▶ CredentialProvider
//!     └─────────────┘      └─────────────┘
//! ```
//!
//! ## Turn flow
//! 1. User input is appended to the history; the context window compacts
//!    older messages if the provider ceiling is exceeded.
//! 2. The provider responds with text or tool-call requests.
//! 3. Each tool call passes the approval gate (risk tier x session mode,
//!    with dangerous shell commands always escalated to a human decision).
//! 4. Results are appended, one per call, and the loop repeats until a
//!    text-only answer or the iteration ceiling.
//!
//! ## Modules
//! - `session`: the orchestrator loop
//! - `approval`: approval modes, remembered decisions, command risk analysis
//! - `history`: context-window compaction
//! - `process`: background process table
//! - `auth`: credential lifecycle (API key / OAuth refresh)
//! - `llm`: provider-agnostic chat model and the Anthropic transport
//! - `tools`: the fixed local tool set

pub mod approval;
pub mod auth;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod process;
pub mod session;
pub mod settings;
pub mod tools;

pub use config::Config;
pub use error::AgentError;
pub use session::{FinalResponse, Session};
