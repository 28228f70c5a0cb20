//! Fuzz target: `header::MessageHeader`
//!
//! Decodes arbitrary 32-bit patterns and asserts the bit-pack is
//! total and lossless in both directions.
//!
//! cargo fuzz run fuzz_message_header

#![no_main]

use libfuzzer_sys::fuzz_target;
use wavelink::proto::header::MessageHeader;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);

    let header = MessageHeader::decode(word);
    assert!(header.size < 32);
    assert!(header.player_id < 8);
    assert!(header.client_count < 4);
    assert!(header.packet_id < (1 << 22));
    assert_eq!(header.encode(), word);
});
