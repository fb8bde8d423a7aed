//! Reservation of code signature space at the end of `__LINKEDIT`.
//!
//! The signature always lives at the tail of the `__LINKEDIT` segment. When
//! the space already reserved there is too small, the file grows at the end
//! of that region: `__LINKEDIT` gets longer, and every file offset behind it
//! moves by the same delta. No other segment changes size.

use super::container::MachOContainer;
use super::endian::align_to;
use super::load_command::{LinkeditData, LoadCommand};
use crate::codesign::constants::{CS_SHA1_LEN, CS_SHA256_LEN, PAGE_SIZE};
use crate::{Error, Result};
use goblin::mach::load_command::LC_CODE_SIGNATURE;
use log::{debug, info};
use std::path::Path;

/// Fixed allowance for the identifier, requirements, entitlements and CMS blob.
const SIGNATURE_OVERHEAD: u64 = 16384;

/// `__LINKEDIT` vmsize is kept a multiple of the largest page size in use.
const LINKEDIT_VM_ALIGN: u64 = 0x4000;

/// Signature data starts on a 16-byte boundary.
const SIGNATURE_ALIGN: u64 = 16;

/// Sizes and reserves the code signature region of a slice.
///
/// # Example
///
/// ```no_run
/// use archo::{MachOContainer, SignatureSpaceAllocator};
///
/// let mut container = MachOContainer::open("App")?;
/// let reserved = SignatureSpaceAllocator::new().realloc(&mut container)?;
/// println!("{reserved} bytes reserved for the signature");
/// # Ok::<(), archo::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignatureSpaceAllocator {
    minimum: u64,
    payload_hint: u64,
}

impl SignatureSpaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve at least `bytes`, regardless of the estimate.
    ///
    /// Used to retry after the builder reports that the signature did not fit.
    pub fn reserve_at_least(mut self, bytes: u64) -> Self {
        self.minimum = bytes;
        self
    }

    /// Extra bytes the signature will carry beyond the fixed overhead,
    /// typically entitlements (stored twice: XML and DER).
    pub fn payload_hint(mut self, bytes: u64) -> Self {
        self.payload_hint = bytes;
        self
    }

    /// Estimated size of a signature over `code_length` bytes: one SHA-1 and
    /// one SHA-256 slot per page, page aligned, plus the fixed overhead.
    pub fn estimate_signature_size(code_length: u64) -> u64 {
        let slots = code_length / PAGE_SIZE as u64 + 1;
        align_to(slots * (CS_SHA1_LEN + CS_SHA256_LEN) as u64, PAGE_SIZE as u64)
            + SIGNATURE_OVERHEAD
    }

    fn required(&self, code_length: u64) -> u64 {
        let estimate = Self::estimate_signature_size(code_length)
            + align_to(self.payload_hint, SIGNATURE_ALIGN);
        align_to(estimate.max(self.minimum), SIGNATURE_ALIGN)
    }

    /// Makes sure the slice has a signature region of at least the estimated
    /// size, growing the file when needed. Returns the reserved capacity.
    ///
    /// An existing `LC_CODE_SIGNATURE` region is reused when large enough.
    /// Only its own bytes count, unless it is the last thing in `__LINKEDIT`;
    /// a region that is too small grows in place and everything behind it
    /// moves up. Without a region one is added at the `__LINKEDIT` tail
    /// (needs 16 bytes of load-command padding).
    ///
    /// # Errors
    ///
    /// - [`Error::Format`] if there is no `__LINKEDIT` segment, another
    ///   segment overlaps it, or an offset would overflow after growth
    /// - [`Error::Capacity`] if a new `LC_CODE_SIGNATURE` does not fit in the
    ///   header padding
    pub fn realloc(&self, container: &mut MachOContainer) -> Result<u32> {
        let linkedit = container
            .linkedit()
            .cloned()
            .ok_or_else(|| Error::Format("no __LINKEDIT segment".into()))?;
        let existing = container.code_signature();
        let file_len = container.len() as u64;

        let linkedit_end = linkedit.file_end();
        let region_end = match existing {
            Some(sig) if sig.data_end() > file_len => {
                return Err(Error::Format(format!(
                    "signature region {:#x}+{:#x} exceeds file of {file_len} bytes",
                    sig.dataoff, sig.datasize
                )));
            }
            // data following the signature inside __LINKEDIT is never reused
            Some(sig) => sig.data_end(),
            None => linkedit_end,
        };
        let code_end = existing.map(|s| u64::from(s.dataoff)).unwrap_or(linkedit_end);
        if code_end < linkedit.fileoff {
            return Err(Error::Format(format!(
                "signature at {code_end:#x} precedes __LINKEDIT at {:#x}",
                linkedit.fileoff
            )));
        }

        for seg in container.commands().iter().filter_map(LoadCommand::as_segment) {
            if seg.is_named("__LINKEDIT") || seg.filesize == 0 {
                continue;
            }
            if seg.fileoff < region_end && seg.file_end() > linkedit.fileoff {
                return Err(Error::Format(format!(
                    "segment {} overlaps __LINKEDIT",
                    seg.name()
                )));
            }
        }

        let sig_off = align_to(code_end, SIGNATURE_ALIGN);
        let required = self.required(sig_off);
        let available = region_end.saturating_sub(sig_off);
        let reserved = if available >= required { available } else { required };
        let new_end = sig_off + reserved;
        let delta = new_end.saturating_sub(region_end);

        let dataoff = u32::try_from(sig_off)
            .map_err(|_| Error::Format("signature offset exceeds 32 bits".into()))?;
        let datasize = u32::try_from(reserved)
            .map_err(|_| Error::Format("signature size exceeds 32 bits".into()))?;

        let mut commands = container.commands().to_vec();
        if delta > 0 {
            for command in &mut commands {
                command.shift_file_offsets(region_end, delta)?;
            }
        }

        let mut has_signature = false;
        for command in &mut commands {
            match command {
                LoadCommand::Segment(seg) if seg.is_named("__LINKEDIT") => {
                    let end = if linkedit_end > region_end {
                        linkedit_end + delta
                    } else {
                        new_end
                    };
                    seg.filesize = end - seg.fileoff;
                    seg.vmsize = seg.vmsize.max(align_to(seg.filesize, LINKEDIT_VM_ALIGN));
                }
                LoadCommand::CodeSignature(sig) => {
                    sig.dataoff = dataoff;
                    sig.datasize = datasize;
                    has_signature = true;
                }
                _ => {}
            }
        }
        if !has_signature {
            commands.push(LoadCommand::CodeSignature(LinkeditData {
                cmd: LC_CODE_SIGNATURE,
                dataoff,
                datasize,
            }));
        }

        container.replace_commands(commands)?;
        if delta > 0 {
            let at = region_end as usize;
            container
                .data_mut()
                .splice(at..at, std::iter::repeat(0u8).take(delta as usize));
            info!(
                "grew __LINKEDIT by {delta} bytes, signature reserved at {sig_off:#x} ({reserved} bytes)"
            );
        } else {
            debug!("reusing {reserved} bytes of signature space at {sig_off:#x}");
        }

        Ok(datasize)
    }

    /// [`realloc`](Self::realloc), then writes the result to `target` atomically.
    pub fn realloc_to(&self, container: &mut MachOContainer, target: impl AsRef<Path>) -> Result<u32> {
        let reserved = self.realloc(container)?;
        container.write_to(target)?;
        Ok(reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_small_binary() {
        // one page: 2 slots * 52 bytes, rounded to a page, plus overhead
        assert_eq!(SignatureSpaceAllocator::estimate_signature_size(32), 4096 + 16384);
    }

    #[test]
    fn test_estimate_grows_with_pages() {
        let small = SignatureSpaceAllocator::estimate_signature_size(4096 * 10);
        let large = SignatureSpaceAllocator::estimate_signature_size(4096 * 1000);
        assert!(large > small);
        // 1001 slots * 52 = 52052, aligned to 53248
        assert_eq!(large, 53248 + 16384);
    }

    #[test]
    fn test_required_honors_minimum_and_hint() {
        let alloc = SignatureSpaceAllocator::new().reserve_at_least(100_000);
        assert_eq!(alloc.required(32), align_to(100_000, 16));

        let alloc = SignatureSpaceAllocator::new().payload_hint(10);
        assert_eq!(alloc.required(32), 4096 + 16384 + 16);
    }
}
