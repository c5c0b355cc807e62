//! Text control surface of the balloon and the store watch feeding it targets.

use std::{fmt::Write as _, sync::Arc};

use log::debug;
use thiserror::Error;

use crate::{
    balloon::BalloonStats,
    constants::{pages_to_kb, MAX_CONTROL_WRITE, PAGE_SHIFT},
    ledger::HardLimit,
};

/// Target watch on the configuration store
pub mod watch;

pub use watch::{WatchCallback, XenStore};

/// The part of the balloon the control surfaces drive.
pub trait TargetControl: Send + Sync {
    /// Requests a new reservation of `target_pages` pages.
    fn set_new_target(&self, target_pages: u64);

    fn stats(&self) -> BalloonStats;
}

/// Privilege of the caller writing the control file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Admin,
    User,
}

/// A copy from caller memory failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bad address")]
pub struct CopyFault;

/// A buffer owned by the caller of a control write.
pub trait UserBuffer {
    /// Number of bytes the caller claims to pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the head of the buffer into `dst`.
    ///
    /// # Errors
    ///
    /// Returns `CopyFault` if the caller memory cannot be read.
    fn copy_to(&self, dst: &mut [u8]) -> Result<(), CopyFault>;
}

impl UserBuffer for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn copy_to(&self, dst: &mut [u8]) -> Result<(), CopyFault> {
        let n = dst.len().min(<[u8]>::len(self));
        dst[..n].copy_from_slice(&self[..n]);
        Ok(())
    }
}

/// Rejected control writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ControlError {
    #[error("operation not permitted")]
    PermissionDenied,

    #[error("runt write of {0} bytes")]
    Runt(usize),

    #[error("write of {0} bytes is too long")]
    TooLong(usize),

    #[error(transparent)]
    CopyFault(#[from] CopyFault),

    #[error("malformed memory size: {0:?}")]
    Malformed(String),
}

impl ControlError {
    /// Convert to the errno a control write fails with
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        match *self {
            ControlError::PermissionDenied => libc::EPERM,
            ControlError::Runt(_) => libc::EBADMSG,
            ControlError::TooLong(_) => libc::EFBIG,
            ControlError::CopyFault(_) => libc::EFAULT,
            ControlError::Malformed(_) => libc::EINVAL,
        }
    }
}

/// The status and target file of a balloon.
#[derive(Clone)]
pub struct BalloonControl {
    target: Arc<dyn TargetControl>,
}

impl BalloonControl {
    pub fn new(target: Arc<dyn TargetControl>) -> Self {
        Self { target }
    }

    /// Parses a memory size written by the caller and sets it as the new
    /// target.
    ///
    /// # Returns
    ///
    /// The number of bytes consumed, which is always the whole write.
    ///
    /// # Errors
    ///
    /// Returns a `ControlError` without touching the target if the caller
    /// is unprivileged, the write is shorter than two bytes or longer than
    /// the control buffer, the copy faults or the size cannot be parsed.
    pub fn write<B: UserBuffer + ?Sized>(
        &self,
        privilege: Privilege,
        buffer: &B,
    ) -> Result<usize, ControlError> {
        if privilege != Privilege::Admin {
            return Err(ControlError::PermissionDenied);
        }
        let count = buffer.len();
        if count <= 1 {
            return Err(ControlError::Runt(count));
        }
        if count > MAX_CONTROL_WRITE {
            return Err(ControlError::TooLong(count));
        }

        let mut memstring = [0u8; MAX_CONTROL_WRITE];
        buffer.copy_to(&mut memstring[..count])?;
        // The last byte of the buffer is always the terminator.
        let text = &memstring[..count.min(MAX_CONTROL_WRITE - 1)];
        let text = text
            .iter()
            .position(|&b| b == 0)
            .map_or(text, |end| &text[..end]);

        let bytes = memparse(text).ok_or_else(|| {
            ControlError::Malformed(String::from_utf8_lossy(text).into_owned())
        })?;
        debug!("control write of {bytes} bytes");
        self.target.set_new_target(bytes >> PAGE_SHIFT);
        Ok(count)
    }

    /// Renders the status file.
    pub fn read(&self) -> String {
        render_status(&self.target.stats())
    }
}

fn render_status(stats: &BalloonStats) -> String {
    let mut status = format!(
        "Current allocation: {:8} kB\n\
         Requested target:   {:8} kB\n\
         Low-mem balloon:    {:8} kB\n\
         High-mem balloon:   {:8} kB\n\
         Xen hard limit:     ",
        pages_to_kb(stats.current_pages),
        pages_to_kb(stats.target_pages),
        pages_to_kb(stats.pool_low),
        pages_to_kb(stats.pool_high),
    );
    match stats.hard_limit {
        HardLimit::Known(limit) => {
            let _ignore = writeln!(
                status,
                "{:8} kB (inc. {:8} kB driver headroom)",
                pages_to_kb(limit),
                driver_headroom_kb(stats.driver_pages),
            );
        }
        HardLimit::Unknown => status.push_str("     ??? kB\n"),
    }
    status
}

#[allow(clippy::arithmetic_side_effects)]
fn driver_headroom_kb(driver_pages: i64) -> i64 {
    driver_pages.saturating_mul(1 << (PAGE_SHIFT - 10))
}

/// Parses a memory size the way the kernel command line does.
///
/// Accepts a decimal, `0x` hexadecimal or `0` octal number followed by an
/// optional `K`, `M`, `G`, `T`, `P` or `E` suffix in either case. Bytes
/// after the suffix are ignored. Returns `None` if no digit leads the text
/// or the size does not fit in 64 bits.
pub fn memparse(text: &[u8]) -> Option<u64> {
    let (radix, digits) = match text {
        [b'0', b'x' | b'X', rest @ ..] if rest.first().is_some_and(u8::is_ascii_hexdigit) => {
            (16, rest)
        }
        [b'0', ..] => (8, text),
        _ => (10, text),
    };

    let mut value: u64 = 0;
    let mut len = 0;
    for &b in digits {
        let Some(digit) = char::from(b).to_digit(radix) else {
            break;
        };
        value = value
            .checked_mul(u64::from(radix))?
            .checked_add(u64::from(digit))?;
        len += 1;
    }
    if len == 0 {
        return None;
    }

    let shift = match digits.get(len).map(u8::to_ascii_uppercase) {
        Some(b'E') => 60,
        Some(b'P') => 50,
        Some(b'T') => 40,
        Some(b'G') => 30,
        Some(b'M') => 20,
        Some(b'K') => 10,
        _ => 0,
    };
    if value.leading_zeros() < shift {
        return None;
    }
    Some(value << shift)
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct Recorder {
        targets: Mutex<Vec<u64>>,
        stats: BalloonStats,
    }

    impl TargetControl for Recorder {
        fn set_new_target(&self, target_pages: u64) {
            self.targets.lock().push(target_pages);
        }

        fn stats(&self) -> BalloonStats {
            self.stats
        }
    }

    fn stats(hard_limit: HardLimit) -> BalloonStats {
        BalloonStats {
            current_pages: 256,
            target_pages: 512,
            pool_low: 16,
            pool_high: 8,
            hard_limit,
            driver_pages: 4,
        }
    }

    fn control(hard_limit: HardLimit) -> (BalloonControl, Arc<Recorder>) {
        let recorder = Arc::new(Recorder {
            targets: Mutex::new(Vec::new()),
            stats: stats(hard_limit),
        });
        let control = BalloonControl::new(Arc::clone(&recorder) as Arc<dyn TargetControl>);
        (control, recorder)
    }

    struct FaultingBuffer(usize);

    impl UserBuffer for FaultingBuffer {
        fn len(&self) -> usize {
            self.0
        }

        fn copy_to(&self, _dst: &mut [u8]) -> Result<(), CopyFault> {
            Err(CopyFault)
        }
    }

    #[test]
    fn memparse_suffixes_and_radixes() {
        assert_eq!(memparse(b"512M"), Some(512 << 20));
        assert_eq!(memparse(b"512m\n"), Some(512 << 20));
        assert_eq!(memparse(b"1g"), Some(1 << 30));
        assert_eq!(memparse(b"4096"), Some(4096));
        assert_eq!(memparse(b"0x1000"), Some(0x1000));
        assert_eq!(memparse(b"0x10K"), Some(16 << 10));
        assert_eq!(memparse(b"010"), Some(8));
        assert_eq!(memparse(b"0"), Some(0));
        assert_eq!(memparse(b"2Tfoo"), Some(2 << 40));
        assert_eq!(memparse(b"1E"), Some(1 << 60));
    }

    #[test]
    fn memparse_rejects_garbage_and_overflow() {
        assert_eq!(memparse(b"M"), None);
        assert_eq!(memparse(b" 12"), None);
        assert_eq!(memparse(b""), None);
        assert_eq!(memparse(b"16E"), None);
        assert_eq!(memparse(b"99999999999999999999"), None);
    }

    #[test]
    fn write_sets_target_in_pages() {
        let (control, recorder) = control(HardLimit::Unknown);
        assert_eq!(control.write(Privilege::Admin, &b"512M\n"[..]), Ok(5));
        assert_eq!(*recorder.targets.lock(), vec![(512 << 20) >> PAGE_SHIFT]);
    }

    #[test]
    fn rejected_writes_map_to_errno() {
        let (control, recorder) = control(HardLimit::Unknown);
        let cases: [(&[u8], Privilege, i32); 5] = [
            (b"1G", Privilege::User, libc::EPERM),
            (b"1", Privilege::Admin, libc::EBADMSG),
            (b"", Privilege::Admin, libc::EBADMSG),
            (&[b'1'; 65], Privilege::Admin, libc::EFBIG),
            (b"lots", Privilege::Admin, libc::EINVAL),
        ];
        for (input, privilege, errno) in cases {
            let err = control.write(privilege, input).unwrap_err();
            assert_eq!(err.to_errno(), errno, "input {input:?}");
        }
        let err = control
            .write(Privilege::Admin, &FaultingBuffer(8))
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EFAULT);
        assert!(recorder.targets.lock().is_empty());
    }

    #[test]
    fn full_size_write_drops_the_last_byte() {
        let (control, recorder) = control(HardLimit::Unknown);
        let mut input = [b'0'; 64];
        input[..4].copy_from_slice(b"4096");
        input[4..].fill(b' ');
        input[63] = b'K';
        assert_eq!(control.write(Privilege::Admin, &input[..]), Ok(64));
        assert_eq!(*recorder.targets.lock(), vec![1]);
    }

    #[test]
    fn status_with_unknown_limit() {
        let (control, _recorder) = control(HardLimit::Unknown);
        assert_eq!(
            control.read(),
            "Current allocation:     1024 kB\n\
             Requested target:       2048 kB\n\
             Low-mem balloon:          64 kB\n\
             High-mem balloon:         32 kB\n\
             Xen hard limit:          ??? kB\n"
        );
    }

    #[test]
    fn status_with_known_limit() {
        let (control, _recorder) = control(HardLimit::Known(300));
        let status = control.read();
        assert!(status.ends_with("Xen hard limit:         1200 kB (inc.       16 kB driver headroom)\n"));
    }
}
