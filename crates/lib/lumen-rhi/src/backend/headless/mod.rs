//! Software backend with no GPU behind it.
//!
//! Every device contract is enforced for real (bounds checks, pool epochs,
//! attachment matching) and every recorded command is kept in an inspectable
//! log, so higher layers can be tested on machines without a graphics stack.

mod command;
mod device;

pub use command::{HeadlessCommandList, RecordedCommand};
pub use device::{HeadlessDevice, Submission};
