mod frames;
mod http;
mod server;
mod socket;

pub use frames::{FrameEncoding, FrameError};
pub use http::{HttpRequestClient, RequestMethod};
pub use server::{DEFAULT_API_URL, DEFAULT_SOCKET_URL};
pub use socket::{TransportSettings, WebSocketTransport};
