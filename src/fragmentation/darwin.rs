use libc::{c_int, IPPROTO_IP, IPPROTO_IPV6};

use super::{AddressFamily, DontFragment};
use crate::error::PmtudResult;
use crate::transport::RawSocket;

// netinet/in.h and netinet6/in6.h
const IP_DONTFRAG: c_int = 28;
const IPV6_DONTFRAG: c_int = 62;

/// `IP_DONTFRAG` based backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct DarwinBackend;

impl DontFragment for DarwinBackend {
    fn is_capable(&self) -> bool {
        true
    }

    fn set(&self, socket: RawSocket, family: AddressFamily, enable: bool) -> PmtudResult<()> {
        let val = c_int::from(enable);
        let (level, optname) = match family {
            AddressFamily::V4 => (IPPROTO_IP, IP_DONTFRAG),
            AddressFamily::V6 => (IPPROTO_IPV6, IPV6_DONTFRAG),
        };
        super::setsockopt_int(socket, level, optname, val)?;
        Ok(())
    }
}
