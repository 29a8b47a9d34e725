//! Voice Session Orchestrator.
//!
//! The [`SessionRegistry`] owns every live [`Session`]; each session runs one
//! [`TurnMachine`] task that sequences capture, transcription, the AI
//! exchange, synthesis and playback for one caller.

pub mod collaborators;
pub mod registry;
pub mod session;
pub mod turn;

pub use collaborators::{Collaborators, ReadyCollaborators};
pub use registry::{RegistrySettings, SessionCreated, SessionInfo, SessionRegistry, SessionRequest};
pub use session::{Activity, Session};
pub use turn::{TerminationReason, TurnEvent, TurnMachine, TurnPolicy, TurnSnapshot, TurnSummary};
