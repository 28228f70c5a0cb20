//! Multiboot upload scenarios against a simulated peer boot ROM.
//!
//! The peer model decrypts the stream with its own copy of the key
//! schedule and folds its own CRC, so the final checksum comparison
//! is an end-to-end check of the cipher and CRC implementations.

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, SpiBus};
use wavelink::multiboot::{MultibootError, MultibootUploader, UploadOutcome, HEADER_BYTES};

// ── Peer model ────────────────────────────────────────────────

const CRC_POLY: u32 = 0xC37B;
const SEED_MULTIPLIER: u32 = 0x6F64_6573;
const KEY_XOR: u32 = 0x4320_2F2F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Probe,
    Header,
    KeyProbe,
    KeyRequest,
    KeyToken,
    PaletteAck,
    LengthWord,
    Body,
    ChecksumWait,
    ChecksumReply,
    Done,
}

/// Simulated boot ROM on the far side of the link. Replies are
/// chosen *before* the incoming word is inspected, matching the
/// full-duplex reality of the bus.
struct PeerRom {
    stage: Stage,
    key_token: u32,
    length_token: u32,
    seed: u32,
    crc: u32,
    crc_a: u32,
    crc_b: u32,
    offset: u32,
    fsize: u32,
    checksum_polls: u32,
    /// Decrypted body words, for fixture assertions.
    decrypted: Vec<u32>,
}

impl PeerRom {
    fn new() -> Self {
        Self {
            stage: Stage::Probe,
            key_token: 0x73D1_0000,
            length_token: 0x00AB_0000,
            seed: 0,
            crc: 0xC387,
            crc_a: 0,
            crc_b: 0,
            offset: HEADER_BYTES as u32,
            fsize: 0,
            checksum_polls: 0,
            decrypted: Vec::new(),
        }
    }

    fn crc_step(mut crc: u32, word: u32) -> u32 {
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

    fn reply_for_stage(&self) -> u32 {
        match self.stage {
            Stage::Probe => 0x7202_0000,
            Stage::KeyToken => self.key_token,
            Stage::LengthWord => self.length_token,
            Stage::Body => (self.offset & 0xFFFF) << 16,
            Stage::ChecksumWait => {
                if self.checksum_polls == 0 {
                    0
                } else {
                    0x0075_0000
                }
            }
            Stage::ChecksumReply => (self.crc & 0xFFFF) << 16,
            _ => 0,
        }
    }

    fn advance(&mut self, incoming: u32) {
        match self.stage {
            Stage::Probe => {
                if incoming == 0x6102 {
                    self.stage = Stage::Header;
                }
            }
            Stage::Header => {
                if incoming == 0x6200 {
                    self.stage = Stage::KeyProbe;
                }
            }
            Stage::KeyProbe => self.stage = Stage::KeyRequest,
            Stage::KeyRequest => self.stage = Stage::KeyToken,
            Stage::KeyToken => {
                // Mirror the console's key schedule.
                let crc_a = (self.key_token >> 16) & 0xFF;
                self.seed = 0xFFFF_00D1 | (crc_a << 8);
                self.crc_a = (crc_a + 0xF) & 0xFF;
                self.crc_b = (self.length_token >> 16) & 0xFF;
                self.stage = Stage::PaletteAck;
            }
            Stage::PaletteAck => self.stage = Stage::LengthWord,
            Stage::LengthWord => {
                self.fsize = incoming * 4 + 0x190;
                self.stage = Stage::Body;
            }
            Stage::Body => {
                self.seed = self.seed.wrapping_mul(SEED_MULTIPLIER).wrapping_add(1);
                let plain =
                    self.seed ^ incoming ^ 0xFE00_0000u32.wrapping_sub(self.offset) ^ KEY_XOR;
                self.decrypted.push(plain);
                self.crc = Self::crc_step(self.crc, plain);
                self.offset += 4;
                if self.offset >= self.fsize {
                    self.stage = Stage::ChecksumWait;
                }
            }
            Stage::ChecksumWait => {
                self.checksum_polls += 1;
                if incoming == 0x0066 {
                    // Fold the key material exactly like the console.
                    let tail = 0xFFFF_0000 | (self.crc_b << 8) | self.crc_a;
                    self.crc = Self::crc_step(self.crc, tail);
                    self.stage = Stage::ChecksumReply;
                }
            }
            Stage::ChecksumReply => self.stage = Stage::Done,
            Stage::Done => {}
        }
    }
}

/// SPI-side adapter over the peer model: records traffic, answers
/// word by word.
struct PeerBus {
    rom: PeerRom,
    sent: Vec<u32>,
    fixed_reply: Option<u32>,
}

impl PeerBus {
    fn new() -> Self {
        Self {
            rom: PeerRom::new(),
            sent: Vec::new(),
            fixed_reply: None,
        }
    }

    fn exchange(&mut self, incoming: u32) -> u32 {
        self.sent.push(incoming);
        if let Some(reply) = self.fixed_reply {
            return reply;
        }
        let reply = self.rom.reply_for_stage();
        self.rom.advance(incoming);
        reply
    }
}

impl ErrorType for PeerBus {
    type Error = Infallible;
}

impl SpiBus for PeerBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        words.fill(0);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        let mut buf = words.to_vec();
        self.transfer_in_place(&mut buf)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        let mut buf = write.to_vec();
        self.transfer_in_place(&mut buf)?;
        let n = read.len().min(buf.len());
        read[..n].copy_from_slice(&buf[..n]);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        assert_eq!(words.len(), 4, "uploader always exchanges whole words");
        let incoming = u32::from_be_bytes([words[0], words[1], words[2], words[3]]);
        let reply = self.exchange(incoming);
        words.copy_from_slice(&reply.to_be_bytes());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

struct InstantDelay;

impl DelayNs for InstantDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

// ── Scenarios ─────────────────────────────────────────────────

#[test]
fn upload_streams_image_and_checksums_agree() {
    let image = test_image(512);
    let mut uploader = MultibootUploader::new(PeerBus::new(), InstantDelay);

    let outcome = uploader.upload(&image).expect("upload succeeds");
    let UploadOutcome::Sent {
        local_crc,
        peer_crc,
    } = outcome
    else {
        panic!("expected a completed upload, got {outcome:?}");
    };
    assert_eq!(local_crc, peer_crc);

    let (bus, _) = uploader.release();

    // Fixed preamble: probe, header begin, then the 96 header
    // halfwords in file order.
    assert_eq!(bus.sent[0], 0x6202);
    assert_eq!(bus.sent[1], 0x6102);
    for (i, half) in image[..HEADER_BYTES].chunks_exact(2).enumerate() {
        let expected = u32::from(u16::from_le_bytes([half[0], half[1]]));
        assert_eq!(bus.sent[2 + i], expected);
    }
    let after_header = 2 + HEADER_BYTES / 2;
    assert_eq!(bus.sent[after_header], 0x6200);
    assert_eq!(bus.sent[after_header + 1], 0x6202);
    assert_eq!(bus.sent[after_header + 2], 0x63D1);
    assert_eq!(bus.sent[after_header + 3], 0x63D1);
    // Palette word carries the adjusted key byte (0xD1 + 0xF).
    assert_eq!(bus.sent[after_header + 4], 0x6400 | 0xE0);
    // Length word for a 512-byte image: (512 - 0x190) / 4.
    assert_eq!(bus.sent[after_header + 5], (512 - 0x190) / 4);

    // The peer decrypted the exact body the image carries.
    let body: Vec<u32> = image[HEADER_BYTES..]
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    assert_eq!(bus.rom.decrypted, body);
}

#[test]
fn upload_skips_when_peer_already_running() {
    let mut bus = PeerBus::new();
    // The "program running, only L held" reply.
    bus.fixed_reply = Some(1 << 9);
    let mut uploader = MultibootUploader::new(bus, InstantDelay);

    let outcome = uploader.upload(&test_image(512)).expect("probe succeeds");
    assert_eq!(outcome, UploadOutcome::SkippedPeerRunning);

    let (bus, _) = uploader.release();
    // Only the probe went out.
    assert_eq!(bus.sent, [0x6202]);
}

#[test]
fn upload_rejects_bad_key_token() {
    let mut bus = PeerBus::new();
    // High byte must be 0x73.
    bus.rom.key_token = 0x42D1_0000;
    let mut uploader = MultibootUploader::new(bus, InstantDelay);

    let err = uploader.upload(&test_image(512)).unwrap_err();
    assert_eq!(
        err,
        MultibootError::Handshake {
            token: 0x42D1_0000
        }
    );
}

#[test]
fn upload_rejects_undersized_and_oversized_images() {
    let mut uploader = MultibootUploader::new(PeerBus::new(), InstantDelay);
    assert_eq!(
        uploader.upload(&test_image(0x100)).unwrap_err(),
        MultibootError::ImageTooSmall
    );
    assert_eq!(
        uploader.upload(&test_image(0x4_0000 + 4)).unwrap_err(),
        MultibootError::ImageTooLarge
    );
}

#[test]
fn word_check_mismatch_is_fatal() {
    let mut bus = PeerBus::new();
    bus.rom.offset = 0; // desync the peer's progress counter
    let mut uploader = MultibootUploader::new(bus, InstantDelay);

    match uploader.upload(&test_image(512)) {
        Err(MultibootError::WordCheck { offset, .. }) => assert_eq!(offset, 0xC0),
        other => panic!("expected a word-check failure, got {other:?}"),
    }
}
