//! Fuzz target: `broadcast::unpack_group`
//!
//! Feeds arbitrary 7-word groups into the advertisement decoder and
//! asserts it never panics and never yields names beyond the fixed
//! field widths.
//!
//! cargo fuzz run fuzz_broadcast_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use wavelink::proto::broadcast::{
    unpack_group, BROADCAST_GROUP_WORDS, MAX_GAME_NAME_LEN, MAX_USER_NAME_LEN,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < BROADCAST_GROUP_WORDS * 4 {
        return;
    }

    let mut group = [0u32; BROADCAST_GROUP_WORDS];
    for (word, chunk) in group.iter_mut().zip(data.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    let server = unpack_group(&group);
    assert!(server.game_name.len() <= MAX_GAME_NAME_LEN);
    assert!(server.user_name.len() <= MAX_USER_NAME_LEN);
    assert_eq!(server.id, group[0] as u16);
});
