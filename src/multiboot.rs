//! Multiboot image uploader.
//!
//! One-shot upload of an executable image to a peer device over the
//! 32-bit serial primitive, with the console side as bus master. The
//! peer boots from its serial port: after a fixed handshake the
//! image header streams in the clear, then the body is encrypted
//! with a seeded multiply-add stream cipher while both sides fold a
//! rolling CRC; a final checksum exchange lets the peer verify the
//! upload.
//!
//! The uploader owns the bus for its whole run and must finish
//! before any session driver touches the port. The caller provides a
//! configured `SpiBus` (8-bit words, clock idle high, capture on
//! second edge, ~1 MHz) and a delay source; bytes of each 32-bit
//! value go out most-significant first.
//!
//! Wire constants and ordering are a bit-exact contract with the
//! peer's boot ROM; nothing here is tunable.

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiBus;
use log::{debug, info};

/// Clear-text image header length.
pub const HEADER_BYTES: usize = 0xC0;

/// Smallest streamable image (the length word underflows below it).
pub const MIN_IMAGE_BYTES: usize = 0x190;

/// Largest image the peer's boot window accepts (256 KiB).
pub const MAX_IMAGE_BYTES: usize = 0x4_0000;

const INTER_WORD_DELAY_MS: u32 = 3;
const POLL_DELAY_MS: u32 = 10;

const PROBE: u32 = 0x6202;
const PROBE_READY_HIGH: u32 = 0x7202;
/// The peer's program is already running with only L held down.
const PEER_RUNNING: u32 = 1 << 9;

const BEGIN_HEADER: u32 = 0x6102;
const END_HEADER: u32 = 0x6200;
const REQUEST_KEYS: u32 = 0x63D1;
const KEY_TOKEN_HIGH_BYTE: u32 = 0x73;

const CRC_INIT: u32 = 0xC387;
const CRC_POLY: u32 = 0xC37B;
const SEED_BASE: u32 = 0xFFFF_00D1;
const SEED_MULTIPLIER: u32 = 0x6F64_6573;
const KEY_XOR: u32 = 0x4320_2F2F;
const OFFSET_XOR_BASE: u32 = 0xFE00_0000;

const CHECKSUM_PROBE: u32 = 0x0065;
const CHECKSUM_READY_HIGH: u32 = 0x0075;
const CHECKSUM_BEGIN: u32 = 0x0066;

/// How an upload run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Image streamed completely. `peer_crc` is the checksum the
    /// peer reported back; it matches `local_crc` on a clean link.
    Sent { local_crc: u16, peer_crc: u16 },
    /// The peer answered "already running"; nothing was sent.
    SkippedPeerRunning,
}

/// Upload failures. The protocol has no mid-flight recovery: any
/// error means the peer must be power-cycled and the upload rerun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultibootError<E> {
    /// Image shorter than the minimum streamable size.
    ImageTooSmall,
    /// Image exceeds the peer's boot window.
    ImageTooLarge,
    /// The key-exchange token did not carry the expected marker.
    Handshake { token: u32 },
    /// The peer's per-word progress check disagreed with ours.
    WordCheck { offset: u32, check: u16 },
    /// The underlying SPI bus failed.
    Bus(E),
}

impl<E> core::fmt::Display for MultibootError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ImageTooSmall => write!(f, "image too small"),
            Self::ImageTooLarge => write!(f, "image too large"),
            Self::Handshake { token } => write!(f, "handshake failed (token {token:#010X})"),
            Self::WordCheck { offset, check } => {
                write!(f, "word check failed at {offset:#X} (got {check:#06X})")
            }
            Self::Bus(_) => write!(f, "bus error"),
        }
    }
}

/// The uploader. Wraps the bus and delay for one or more runs.
pub struct MultibootUploader<S, D> {
    spi: S,
    delay: D,
}

impl<S: SpiBus, D: DelayNs> MultibootUploader<S, D> {
    pub fn new(spi: S, delay: D) -> Self {
        Self { spi, delay }
    }

    /// Hand the bus and delay back once uploading is done.
    pub fn release(self) -> (S, D) {
        (self.spi, self.delay)
    }

    /// Upload `image` to the peer. Blocks until the peer answers the
    /// initial probe, then streams the whole image.
    pub fn upload(&mut self, image: &[u8]) -> Result<UploadOutcome, MultibootError<S::Error>> {
        if image.len() < MIN_IMAGE_BYTES {
            return Err(MultibootError::ImageTooSmall);
        }
        if image.len() > MAX_IMAGE_BYTES {
            return Err(MultibootError::ImageTooLarge);
        }

        // 1. Wait for the peer's boot ROM to answer the probe.
        let reply = loop {
            let reply = self.exchange(PROBE)?;
            if reply >> 16 == PROBE_READY_HIGH || reply == PEER_RUNNING {
                break reply;
            }
            self.delay.delay_ms(POLL_DELAY_MS);
        };
        if reply == PEER_RUNNING {
            info!("multiboot: peer already running, upload skipped");
            return Ok(UploadOutcome::SkippedPeerRunning);
        }

        // 2. Stream the clear-text header as 16-bit halves.
        self.exchange_paced(BEGIN_HEADER)?;
        for half in image[..HEADER_BYTES].chunks_exact(2) {
            let value = u16::from_le_bytes([half[0], half[1]]);
            self.exchange_paced(u32::from(value))?;
        }
        self.exchange_paced(END_HEADER)?;

        // 3. Key exchange: the token seeds the cipher and the CRC
        //    tail bytes.
        self.exchange_paced(PROBE)?;
        self.exchange_paced(REQUEST_KEYS)?;
        let token = self.exchange_paced(REQUEST_KEYS)?;
        if token >> 24 != KEY_TOKEN_HIGH_BYTE {
            return Err(MultibootError::Handshake { token });
        }

        let mut crc_a = (token >> 16) & 0xFF;
        let mut seed = SEED_BASE | (crc_a << 8);
        crc_a = (crc_a + 0xF) & 0xFF;
        self.exchange_paced(0x6400 | crc_a)?;

        let fsize = (image.len() as u32 + 0xF) & !0xF;
        let token = self.exchange_paced((fsize - 0x190) / 4)?;
        let crc_b = (token >> 16) & 0xFF;
        let mut crc = CRC_INIT;

        debug!("multiboot: streaming {fsize:#X} bytes");

        // 4. Stream the body, encrypted, checking the peer's echoed
        //    progress counter word by word.
        let mut offset = HEADER_BYTES as u32;
        while offset < fsize {
            let word = read_word_padded(image, offset as usize);

            crc = crc_step(crc, word);
            seed = seed.wrapping_mul(SEED_MULTIPLIER).wrapping_add(1);
            let encrypted = seed ^ word ^ OFFSET_XOR_BASE.wrapping_sub(offset) ^ KEY_XOR;

            let check = (self.exchange_paced(encrypted)? >> 16) as u16;
            if check != (offset & 0xFFFF) as u16 {
                return Err(MultibootError::WordCheck { offset, check });
            }
            offset += 4;
        }

        // 5. Fold the key material into the CRC and swap checksums.
        crc = crc_step(crc, 0xFFFF_0000 | (crc_b << 8) | crc_a);

        self.exchange_paced(CHECKSUM_PROBE)?;
        loop {
            let reply = self.exchange_paced(CHECKSUM_PROBE)? >> 16;
            if reply == CHECKSUM_READY_HIGH {
                break;
            }
            self.delay.delay_ms(POLL_DELAY_MS);
        }
        self.exchange_paced(CHECKSUM_BEGIN)?;

        let local_crc = (crc & 0xFFFF) as u16;
        let peer_crc = (self.exchange_paced(u32::from(local_crc))? >> 16) as u16;

        info!("multiboot: done (crc local {local_crc:#06X}, peer {peer_crc:#06X})");
        Ok(UploadOutcome::Sent {
            local_crc,
            peer_crc,
        })
    }

    /// One 32-bit exchange, bytes most-significant first.
    fn exchange(&mut self, word: u32) -> Result<u32, MultibootError<S::Error>> {
        let mut bytes = word.to_be_bytes();
        self.spi
            .transfer_in_place(&mut bytes)
            .map_err(MultibootError::Bus)?;
        self.spi.flush().map_err(MultibootError::Bus)?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Exchange followed by the peer's required settling delay.
    fn exchange_paced(&mut self, word: u32) -> Result<u32, MultibootError<S::Error>> {
        let reply = self.exchange(word)?;
        self.delay.delay_ms(INTER_WORD_DELAY_MS);
        Ok(reply)
    }
}

/// Read the little-endian word at `offset`, zero-padded past the end
/// of the image (the stream length is rounded up to 16 bytes).
fn read_word_padded(image: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    for (i, byte) in bytes.iter_mut().enumerate() {
        if let Some(&value) = image.get(offset + i) {
            *byte = value;
        }
    }
    u32::from_le_bytes(bytes)
}

/// One 32-bit step of the rolling CRC both sides maintain.
pub(crate) fn crc_step(mut crc: u32, word: u32) -> u32 {
    let mut tmp = word;
    for _ in 0..32 {
        let bit = (crc ^ tmp) & 1;
        crc >>= 1;
        if bit != 0 {
            crc ^= CRC_POLY;
        }
        tmp >>= 1;
    }
    crc
}

// ── Tests ────────────────────────────────────────────────────
