// mdmctl-api: async client surface for remote device-management APIs

pub mod error;
pub mod http;
pub mod object;
pub mod transport;

pub use error::Error;
pub use http::HttpRemoteClient;
pub use object::{RemoteObject, RemoteObjectClient};
pub use transport::{TlsMode, TransportConfig};
