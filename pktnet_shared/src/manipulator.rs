//! Reversible byte-transform stages applied to whole frames.
//!
//! Stages run in insertion order on send and in reverse order on receipt,
//! so `apply(encrypt) -> apply(obfuscate)` is undone as
//! `restore(obfuscate) -> restore(encrypt)`.

use std::fmt;
use std::sync::Arc;

use rand::RngCore;

use crate::error::{NetError, NetResult};

/// One reversible frame transform.
pub trait DataManipulator: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn apply(&self, frame: Vec<u8>) -> NetResult<Vec<u8>>;

    fn restore(&self, frame: Vec<u8>) -> NetResult<Vec<u8>>;
}

/// Ordered list of stages. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ManipulatorChain {
    stages: Vec<Arc<dyn DataManipulator>>,
}

impl ManipulatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: impl DataManipulator + 'static) {
        self.stages.push(Arc::new(stage));
    }

    pub fn with(mut self, stage: impl DataManipulator + 'static) -> Self {
        self.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Forward pass, first stage first.
    pub fn apply(&self, frame: Vec<u8>) -> NetResult<Vec<u8>> {
        self.stages
            .iter()
            .try_fold(frame, |frame, stage| stage.apply(frame))
    }

    /// Reverse pass, last stage first.
    pub fn restore(&self, frame: Vec<u8>) -> NetResult<Vec<u8>> {
        self.stages
            .iter()
            .rev()
            .try_fold(frame, |frame, stage| stage.restore(frame))
    }
}

/// Repeating-key XOR. Obfuscation only.
#[derive(Clone)]
pub struct XorObfuscator {
    key: Vec<u8>,
}

impl XorObfuscator {
    /// # Panics
    /// Panics if `key` is empty.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        assert!(!key.is_empty(), "xor key must not be empty");
        Self { key }
    }

    /// Random key of `len` bytes (at least one). Both peers need the same key,
    /// so this is only useful when the key is shared out of band.
    pub fn random(len: usize) -> Self {
        let mut key = vec![0u8; len.max(1)];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    fn xor(&self, mut frame: Vec<u8>) -> Vec<u8> {
        for (byte, k) in frame.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
        frame
    }
}

impl fmt::Debug for XorObfuscator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XorObfuscator")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl DataManipulator for XorObfuscator {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn apply(&self, frame: Vec<u8>) -> NetResult<Vec<u8>> {
        Ok(self.xor(frame))
    }

    fn restore(&self, frame: Vec<u8>) -> NetResult<Vec<u8>> {
        Ok(self.xor(frame))
    }
}

/// Appends a CRC-32 trailer and verifies it on restore.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumSeal;

impl DataManipulator for ChecksumSeal {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn apply(&self, mut frame: Vec<u8>) -> NetResult<Vec<u8>> {
        let sum = crc32fast::hash(&frame);
        frame.extend_from_slice(&sum.to_be_bytes());
        Ok(frame)
    }

    fn restore(&self, mut frame: Vec<u8>) -> NetResult<Vec<u8>> {
        if frame.len() < 4 {
            return Err(NetError::Manipulator {
                stage: self.name(),
                reason: format!("frame of {} bytes has no trailer", frame.len()),
            });
        }
        let split = frame.len() - 4;
        let mut trailer = [0u8; 4];
        trailer.copy_from_slice(&frame[split..]);
        frame.truncate(split);

        let expected = u32::from_be_bytes(trailer);
        let actual = crc32fast::hash(&frame);
        if expected != actual {
            return Err(NetError::Manipulator {
                stage: self.name(),
                reason: format!("checksum mismatch: expected {expected:#010x}, got {actual:#010x}"),
            });
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the order in which stages run.
    #[derive(Debug)]
    struct Tag(u8);

    impl DataManipulator for Tag {
        fn name(&self) -> &'static str {
            "tag"
        }

        fn apply(&self, mut frame: Vec<u8>) -> NetResult<Vec<u8>> {
            frame.push(self.0);
            Ok(frame)
        }

        fn restore(&self, mut frame: Vec<u8>) -> NetResult<Vec<u8>> {
            match frame.pop() {
                Some(tag) if tag == self.0 => Ok(frame),
                other => Err(NetError::Manipulator {
                    stage: "tag",
                    reason: format!("expected {}, found {other:?}", self.0),
                }),
            }
        }
    }

    #[test]
    fn stages_apply_forward_and_restore_in_reverse() {
        let chain = ManipulatorChain::new().with(Tag(1)).with(Tag(2));
        let sealed = chain.apply(vec![9]).unwrap();
        assert_eq!(sealed, vec![9, 1, 2]);
        assert_eq!(chain.restore(sealed).unwrap(), vec![9]);
    }

    #[test]
    fn xor_is_reversible_and_changes_bytes() {
        let xor = XorObfuscator::new(vec![0x5A, 0xA5]);
        let plain = b"hello world".to_vec();
        let hidden = xor.apply(plain.clone()).unwrap();
        assert_ne!(hidden, plain);
        assert_eq!(xor.restore(hidden).unwrap(), plain);
    }

    #[test]
    fn random_xor_key_has_requested_length() {
        assert_eq!(XorObfuscator::random(16).key().len(), 16);
        assert_eq!(XorObfuscator::random(0).key().len(), 1);
    }

    #[test]
    fn seal_appends_the_crc_of_the_frame() {
        let sealed = ChecksumSeal.apply(b"123456789".to_vec()).unwrap();
        assert_eq!(&sealed[..9], b"123456789");
        assert_eq!(sealed[9..], 0xCBF4_3926u32.to_be_bytes());

        let mut tampered = sealed.clone();
        tampered[9] ^= 0x01;
        assert!(ChecksumSeal.restore(tampered).is_err());
        assert!(ChecksumSeal.restore(vec![1, 2]).is_err());
        assert_eq!(ChecksumSeal.restore(sealed).unwrap(), b"123456789");
    }

    #[test]
    fn checksum_detects_corruption() {
        let chain = ManipulatorChain::new().with(ChecksumSeal).with(XorObfuscator::new(*b"k"));
        let mut sealed = chain.apply(b"payload".to_vec()).unwrap();
        assert_eq!(chain.restore(sealed.clone()).unwrap(), b"payload");

        sealed[2] ^= 0xFF;
        assert!(matches!(
            chain.restore(sealed),
            Err(NetError::Manipulator { stage: "checksum", .. })
        ));
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = ManipulatorChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.apply(vec![1, 2, 3]).unwrap(), vec![1, 2, 3]);
    }
}
