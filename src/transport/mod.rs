pub mod codec;
pub mod proxy;

pub use proxy::ProxyPeer;
