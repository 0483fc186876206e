//! `udp.*` (§6): `createSocket` — connectionless datagram sockets.

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::evaluator::CallbackHandle;
use crate::streams::udp::UdpHandle;

use super::Modules;

/// `udp.createSocket(address, port, onError?)`.
pub fn create_socket(
    modules: &Modules,
    address: IpAddr,
    port: u16,
    on_error: Option<CallbackHandle>,
) -> Result<Arc<UdpHandle>, RuntimeError> {
    UdpHandle::bind(&modules.reactor, address, port, on_error).map_err(|e| RuntimeError::System(format!("udp bind failed: {e}")))
}
