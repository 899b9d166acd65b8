//! Request/response correlation and inbound envelope routing.

pub mod correlator;
pub mod dispatcher;

pub use correlator::{CallError, Correlator};
pub use dispatcher::{reply, Dispatched, Dispatcher, InboundHandler};
