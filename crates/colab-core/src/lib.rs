//! The workspace session engine (spec §1): join-ticket admission,
//! permission resolution, the workspace registry, per-workspace session
//! state, the message dispatcher, and fan-out broadcast.

pub mod broadcast;
pub mod dispatcher;
pub mod permissions;
pub mod registry;
pub mod session;
pub mod ticket;

pub use broadcast::{broadcast, send_to};
pub use dispatcher::{Connection, Dispatcher};
pub use permissions::PermissionState;
pub use registry::{Workspace, WorkspaceRegistry};
pub use session::{EntityRecord, Lock, Member, Outbound, SessionState};
pub use ticket::{TicketClaims, TicketError, TicketVerifier};
