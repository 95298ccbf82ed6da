//! Fuzz target: user-management response decoders.
//!
//! The first byte picks the decoder, the rest become int32 slots and the
//! string. Decoders must reject malformed input, never panic.
//!
//! cargo fuzz run fuzz_user_codec

#![no_main]

use libfuzzer_sys::fuzz_target;
use propbus::property::PropertyValue;
use propbus::protocol::user_codec;
use propbus::protocol::user_types::MAX_ASSOCIATIONS;

fuzz_target!(|data: &[u8]| {
    let Some((&which, rest)) = data.split_first() else {
        return;
    };
    let ints: Vec<i32> = rest
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let tail = &rest[rest.len() - rest.len() % 4..];
    let value = PropertyValue::builder(0x11e0_0f07)
        .int32s(ints)
        .string(String::from_utf8_lossy(tail).into_owned())
        .build();

    match which % 5 {
        0 => {
            let _ = user_codec::decode_initial_user_info_response(&value);
        }
        1 => {
            let _ = user_codec::decode_switch_user_response(&value);
        }
        2 => {
            if let Ok(r) = user_codec::decode_switch_user_vehicle_request(&value) {
                assert!(r.request_id <= 0);
            }
        }
        3 => {
            let _ = user_codec::decode_create_user_response(&value);
        }
        _ => {
            if let Ok(r) = user_codec::decode_user_identification_response(&value) {
                assert!(r.associations.len() <= MAX_ASSOCIATIONS);
            }
        }
    }
});
