use super::{AddressFamily, DontFragment};
use crate::error::{PmtudError, PmtudResult};
use crate::transport::RawSocket;

/// Backend for platforms without a usable don't-fragment option.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl DontFragment for UnsupportedBackend {
    fn is_capable(&self) -> bool {
        false
    }

    fn set(&self, _socket: RawSocket, _family: AddressFamily, _enable: bool) -> PmtudResult<()> {
        Err(PmtudError::Unsupported)
    }
}
