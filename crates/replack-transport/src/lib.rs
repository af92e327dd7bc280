//! Transport abstractions for replack.
//!
//! The tracker only depends on the dispatch and completion traits defined in
//! this crate; real RPC stacks implement them at the process edge.

pub mod adapter;
pub mod channel;
pub mod session;

pub use adapter::{
    Completion, CompletionHandler, DispatchRequest, InMemoryTransport, Transport, TransportError,
    TransportHealthSnapshot,
};
pub use channel::{channel_transport, ChannelTransport, DispatchReceiver};
pub use session::SessionLease;
