//! HTTP broadcast server
//!
//! Routes:
//!
//! | Path | Response |
//! |------|----------|
//! | `/` | 301 to `/index.html` |
//! | `/index.html` | landing page embedding the stream |
//! | `/stream.mjpg` | endless `multipart/x-mixed-replace` JPEG stream |
//! | `/status` | JSON server status |
//! | anything else | 404 |

pub mod handlers;
pub mod page;
pub mod server;
pub mod session;

pub use server::{AppState, StreamServer};
pub use session::{ClientSession, CloseReason, SessionInfo, SessionRegistry, SessionState};
