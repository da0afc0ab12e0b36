//! Radio keep-alive: platform seam for holding the radio awake while the transport runs.

use std::io;

/// Scoped hold on the platform radio. Acquired by the transport on init and
/// released on close; platforms that need nothing (Linux) plug in the no-op.
/// `release` may be called without a prior acquire and must be a no-op then.
pub trait RadioLock {
    fn acquire(&mut self) -> io::Result<()>;
    fn release(&mut self);
}

/// No-op lock: Linux keeps the interface up without an explicit power hint.
pub struct NoopRadioLock;

impl RadioLock for NoopRadioLock {
    fn acquire(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn release(&mut self) {}
}
