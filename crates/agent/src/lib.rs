//! The orchestration loop: the heart of Glimpse.
//!
//! Each user turn follows a **stream → dispatch → repeat** cycle:
//!
//! 1. **Append** the user input to the conversation log
//! 2. **Stream** a model step over the log snapshot and the two tool definitions
//! 3. **If tool calls**: record them, run them, record their results, go to 2
//! 4. **If text only**: record the answer and finish
//!
//! The loop also finishes when the step budget (at most 15) runs out. Images
//! surfaced by a search are always analyzed and displayed before any
//! narrative text reaches the user.

pub mod loop_runner;
pub mod prompt;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::{AgentLoop, TurnResult};
pub use prompt::system_prompt;
pub use stream_event::{AgentStreamEvent, Presenter};
