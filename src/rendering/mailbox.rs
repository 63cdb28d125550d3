//! Single-slot frame handoff between capture threads and the render thread.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// BGRA32 pixel size in bytes.
pub const BYTES_PER_PIXEL: u32 = 4;

/// One captured frame: BGRA bytes plus their layout.
///
/// `stride` is the byte distance between row starts and may exceed
/// `width * 4` when the producer pads rows. The final row is stored
/// without padding.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

/// Overwrite-on-write mailbox holding at most one pending frame.
///
/// `submit` is callable from any thread and never waits on the consumer
/// beyond the payload copy; a new frame always replaces an unread one.
/// `take` swaps the pending payload into the caller's scratch frame, so
/// in steady state both sides recycle their buffers instead of
/// reallocating per frame.
///
/// The ready flag changes only while the slot is locked; the flag and
/// the payload it announces can never disagree. `has_pending` is the
/// one lock-free reader.
pub struct FrameMailbox {
    ready: AtomicBool,
    slot: Mutex<RawFrame>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            slot: Mutex::new(RawFrame::default()),
        }
    }

    /// Store a frame, replacing any unread one. Returns false (and changes
    /// nothing) when the dimensions or buffer length are malformed.
    pub fn submit(&self, data: &[u8], width: u32, height: u32, stride: u32) -> bool {
        let Some(needed) = submission_len(data.len(), width, height, stride) else {
            log::trace!(
                "[Mailbox] dropped malformed frame: {}x{} stride {} len {}",
                width,
                height,
                stride,
                data.len()
            );
            return false;
        };

        let mut slot = self.slot.lock();
        slot.data.clear();
        slot.data.extend_from_slice(&data[..needed]);
        slot.width = width;
        slot.height = height;
        slot.stride = stride;
        self.ready.store(true, Ordering::SeqCst);
        true
    }

    /// Move the pending frame into `out` if one is ready, clearing the
    /// ready flag. Render-thread side of the handoff.
    pub fn take(&self, out: &mut RawFrame) -> bool {
        let mut slot = self.slot.lock();
        if !self.ready.swap(false, Ordering::SeqCst) {
            return false;
        }
        std::mem::swap(&mut out.data, &mut slot.data);
        out.width = slot.width;
        out.height = slot.height;
        out.stride = slot.stride;
        true
    }

    /// Drop any unread frame.
    pub fn clear(&self) {
        let _slot = self.slot.lock();
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn has_pending(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of bytes a valid submission must provide: full-stride rows plus
/// one tight final row. None when the dimensions are unusable or `len` is
/// too short.
fn submission_len(len: usize, width: u32, height: u32, stride: u32) -> Option<usize> {
    if width == 0 || height == 0 {
        return None;
    }
    let tight = width.checked_mul(BYTES_PER_PIXEL)?;
    if stride < tight {
        return None;
    }
    let needed = (height as u64 - 1) * stride as u64 + tight as u64;
    if (len as u64) < needed {
        return None;
    }
    Some(needed as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn solid_frame(value: u8, width: u32, height: u32) -> Vec<u8> {
        vec![value; (width * height * BYTES_PER_PIXEL) as usize]
    }

    #[test]
    fn test_take_without_submit() {
        let mailbox = FrameMailbox::new();
        let mut out = RawFrame::default();
        assert!(!mailbox.take(&mut out));
        assert!(out.data.is_empty());
    }

    #[test]
    fn test_submit_take_round_trip() {
        let mailbox = FrameMailbox::new();
        let data = solid_frame(0x7f, 4, 3);
        assert!(mailbox.submit(&data, 4, 3, 16));

        let mut out = RawFrame::default();
        assert!(mailbox.take(&mut out));
        assert_eq!(out.width, 4);
        assert_eq!(out.height, 3);
        assert_eq!(out.stride, 16);
        assert_eq!(out.data, data);
    }

    #[test]
    fn test_overwrite_keeps_only_latest() {
        let mailbox = FrameMailbox::new();
        for tag in 1..=5u8 {
            assert!(mailbox.submit(&solid_frame(tag, 2, 2), 2, 2, 8));
        }

        let mut out = RawFrame::default();
        assert!(mailbox.take(&mut out));
        assert!(out.data.iter().all(|&b| b == 5));
        assert!(!mailbox.take(&mut out), "only one frame may be pending");
    }

    #[test]
    fn test_take_clears_ready_flag() {
        let mailbox = FrameMailbox::new();
        mailbox.submit(&solid_frame(1, 2, 2), 2, 2, 8);
        assert!(mailbox.has_pending());

        let mut out = RawFrame::default();
        assert!(mailbox.take(&mut out));
        assert!(!mailbox.has_pending());
        assert!(!mailbox.take(&mut out));
    }

    #[test]
    fn test_rejects_malformed_submissions() {
        let mailbox = FrameMailbox::new();
        let data = solid_frame(1, 4, 4);

        assert!(!mailbox.submit(&data, 0, 4, 16));
        assert!(!mailbox.submit(&data, 4, 0, 16));
        assert!(!mailbox.submit(&data, 4, 4, 0));
        assert!(!mailbox.submit(&data, 4, 4, 15));
        assert!(!mailbox.submit(&[], 4, 4, 16));
        assert!(!mailbox.submit(&data[..10], 4, 4, 16));
        assert!(!mailbox.has_pending());
    }

    #[test]
    fn test_malformed_submission_preserves_pending_frame() {
        let mailbox = FrameMailbox::new();
        mailbox.submit(&solid_frame(9, 2, 2), 2, 2, 8);
        assert!(!mailbox.submit(&[], 2, 2, 8));

        let mut out = RawFrame::default();
        assert!(mailbox.take(&mut out));
        assert!(out.data.iter().all(|&b| b == 9));
    }

    #[test]
    fn test_padded_stride_with_tight_final_row() {
        let mailbox = FrameMailbox::new();
        // 2x2 frame, 12-byte stride: row 0 padded, row 1 tight.
        let data: Vec<u8> = (0..20u8).collect();
        assert!(mailbox.submit(&data, 2, 2, 12));

        let mut out = RawFrame::default();
        assert!(mailbox.take(&mut out));
        assert_eq!(out.stride, 12);
        assert_eq!(out.data.len(), 20);
        assert_eq!(&out.data[..], &data[..20]);
    }

    #[test]
    fn test_clear_drops_pending() {
        let mailbox = FrameMailbox::new();
        mailbox.submit(&solid_frame(3, 2, 2), 2, 2, 8);
        mailbox.clear();

        let mut out = RawFrame::default();
        assert!(!mailbox.take(&mut out));
    }

    #[test]
    fn test_contended_submit_take_stays_coherent() {
        const SUBMISSIONS: u32 = 20_000;

        let mailbox = Arc::new(FrameMailbox::new());
        let producer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                // Alternating sizes, each frame tagged with its sequence
                // number in the first pixel.
                let mut small = solid_frame(0, 2, 2);
                let mut large = solid_frame(0, 64, 64);
                for tag in 0..SUBMISSIONS {
                    let (buf, side) = if tag % 2 == 0 {
                        (&mut small, 2)
                    } else {
                        (&mut large, 64)
                    };
                    buf[..4].copy_from_slice(&tag.to_le_bytes());
                    assert!(mailbox.submit(buf, side, side, side * BYTES_PER_PIXEL));
                }
            })
        };

        let mut out = RawFrame::default();
        let mut last_tag = None;
        while !producer.is_finished() {
            if !mailbox.take(&mut out) {
                continue;
            }
            let expected = (out.width * out.height * BYTES_PER_PIXEL) as usize;
            assert_eq!(out.data.len(), expected, "payload must match its dimensions");
            let tag = u32::from_le_bytes(out.data[..4].try_into().unwrap());
            if let Some(prev) = last_tag {
                assert!(tag > prev, "took frame {} after frame {}", tag, prev);
            }
            last_tag = Some(tag);
        }
        producer.join().unwrap();

        if mailbox.take(&mut out) {
            last_tag = Some(u32::from_le_bytes(out.data[..4].try_into().unwrap()));
        }
        assert_eq!(last_tag, Some(SUBMISSIONS - 1));
    }

    #[test]
    fn test_submission_len_bounds() {
        assert_eq!(submission_len(16, 2, 2, 8), Some(16));
        assert_eq!(submission_len(20, 2, 2, 12), Some(20));
        assert_eq!(submission_len(64, 2, 2, 8), Some(16));
        assert_eq!(submission_len(15, 2, 2, 8), None);
        assert_eq!(submission_len(1 << 20, 0, 2, 8), None);
        assert_eq!(submission_len(1 << 20, u32::MAX, 1, u32::MAX), None);
    }
}
