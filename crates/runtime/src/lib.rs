//! Cooperative actor runtime with fault links, monitors, and a
//! request/response layer.
//!
//! Actors are isolated units of state driven exclusively by messages from an
//! unbounded per-actor mailbox. A fixed pool of worker execution contexts
//! drives every actor's receive loop; the registry tracks identity, assigns
//! new actors to the least-loaded worker, and resolves link/monitor
//! dependency edges when an actor terminates. [`Server`] layers a
//! GenServer-style blocking `call` / fire-and-forget `cast` protocol over a
//! single actor, serializing all access to user state.
//!
//! * `mailbox`: the per-actor FIFO queue with a blocking receive
//! * `actor`: identity, signals, spawn builder, and handles
//! * `runtime`: the entrypoint owning the worker pool and registry
//! * `server`: the request/response abstraction

mod actor;
mod mailbox;
mod registry;
mod runtime;
mod server;
mod worker;

pub use actor::{ActorBuilder, ActorFlow, ActorHandle, ActorId, Signal};
pub use mailbox::{Mailbox, MailboxReceiver, MailboxSendError, MailboxSender};
pub use runtime::{Runtime, RuntimeConfig};
pub use server::{Init, ResponseReceiver, Server, ServerContext, ServerError};
