use libc::{
    IPPROTO_IP, IPPROTO_IPV6, IPV6_MTU_DISCOVER, IPV6_PMTUDISC_DO, IPV6_PMTUDISC_DONT,
    IP_MTU_DISCOVER, IP_PMTUDISC_DO, IP_PMTUDISC_DONT,
};

use super::{AddressFamily, DontFragment};
use crate::error::PmtudResult;
use crate::transport::RawSocket;

/// `IP_MTU_DISCOVER` based backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxBackend;

impl DontFragment for LinuxBackend {
    fn is_capable(&self) -> bool {
        true
    }

    fn set(&self, socket: RawSocket, family: AddressFamily, enable: bool) -> PmtudResult<()> {
        let (level, optname, val) = match family {
            AddressFamily::V4 => {
                let val = if enable { IP_PMTUDISC_DO } else { IP_PMTUDISC_DONT };
                (IPPROTO_IP, IP_MTU_DISCOVER, val)
            }
            AddressFamily::V6 => {
                let val = if enable { IPV6_PMTUDISC_DO } else { IPV6_PMTUDISC_DONT };
                (IPPROTO_IPV6, IPV6_MTU_DISCOVER, val)
            }
        };
        super::setsockopt_int(socket, level, optname, val)?;
        Ok(())
    }
}
