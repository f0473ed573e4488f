//! # castforged-process
//!
//! Launches, monitors and terminates external capture processes.
//!
//! - [`ProcessEngine`] runs a [`ProcessRequest`] and always returns after the
//!   child has been reaped, whether it exited, timed out or was cancelled.
//! - Output is drained concurrently and capped; lines can be observed live.
//! - Termination is idempotent: the process table tracks each session through
//!   `Running -> Terminating -> Reaped`.
//!
//! ## Example
//!
//! ```no_run
//! use castforged_process::{ProcessEngine, ProcessRequest};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> castforged_process::Result<()> {
//! let engine = ProcessEngine::default();
//! let request = ProcessRequest::new(["streamlink", "https://twitcasting.tv/user", "best"])?
//!     .with_timeout(Duration::from_secs(3600));
//! let result = engine.execute(request, &CancellationToken::new()).await?;
//! println!("{} after {:?}", result.exit, result.duration);
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod output;
mod request;
mod result;
mod slot;
pub mod tools;

pub use engine::{EngineConfig, EngineStats, ProcessEngine, DEFAULT_OUTPUT_CAP};
pub use error::{ProcessError, Result};
pub use output::OutputLine;
pub use request::ProcessRequest;
pub use result::{ExitOutcome, ProcessResult};
pub use slot::SlotState;
pub use tools::{check_tool, check_tools, require_tool, resolve_tool, ToolInfo};
