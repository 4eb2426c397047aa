//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept, read first head)
//!     → request.rs (parse head without consuming it)
//!     ├─ CONNECT → tunnel establisher (raw socket)
//!     └─ other   → hyper HTTP/1.1 + Axum app
//!                    → direct.rs  (designated host → TLS backend)
//!                    → forward.rs (other hosts → upstream proxy)
//!                    → proxy.rs   (shared reqwest forwarding)
//! ```

pub mod direct;
pub mod forward;
pub mod headers;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use direct::DirectProxy;
pub use forward::UpstreamProxy;
pub use proxy::ProxyError;
pub use request::{HeadError, RequestHead};
pub use server::{AppState, ProxyServer, ServerError};
