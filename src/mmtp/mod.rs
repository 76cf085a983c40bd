pub mod session;
pub mod wire;

pub use session::{Dialer, SessionSettings, SessionState, TransportSession};
pub use wire::MmtpMessage;
