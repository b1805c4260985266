//! waive-core: session model, tool plans, and path safety for the tool core

pub mod clip;
pub mod diff;
pub mod edit_session;
pub mod error;
pub mod path_sanitizer;
pub mod project;
pub mod session;
pub mod track;

pub use clip::{Clip, ClipId, ClipKind};
pub use diff::{summarise_plan, ToolDiffEntry, ToolDiffKind, ToolPlan};
pub use edit_session::EditSession;
pub use error::{Result, WaiveError};
pub use path_sanitizer::{is_valid_identifier, is_within_directory, sanitize_path_component};
pub use project::Project;
pub use session::{EditBody, SessionEditor, SessionHost, SessionView, TrackView};
pub use track::Track;
