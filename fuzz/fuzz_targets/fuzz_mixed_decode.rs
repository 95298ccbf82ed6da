//! Fuzz target: `MixedLayout` parsing and decoding.
//!
//! Nine bytes form the config array; the remainder fills the payload.
//! Whatever decodes must encode back to the same payload, booleans
//! normalised to 0/1.
//!
//! cargo fuzz run fuzz_mixed_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use propbus::property::{MixedLayout, PropertyValue};

fuzz_target!(|data: &[u8]| {
    if data.len() < MixedLayout::SLOTS {
        return;
    }
    let (head, rest) = data.split_at(MixedLayout::SLOTS);
    let config: Vec<i32> = head.iter().map(|b| i32::from(b % 4)).collect();
    let Ok(layout) = MixedLayout::from_config_array(&config) else {
        return;
    };

    let ints: Vec<i32> = rest.iter().take(layout.int32_count()).map(|b| i32::from(*b)).collect();
    let value = PropertyValue::builder(0x21e0_0666)
        .int32s(ints)
        .int64s(vec![7; layout.int64_count()])
        .floats(vec![0.5; layout.float_count()])
        .bytes(rest.iter().rev().take(layout.byte_array_len).copied().collect::<Vec<_>>())
        .build();

    if let Ok(mixed) = layout.decode(&value) {
        let packed = layout
            .encode(value.property_id(), value.area_id(), &mixed)
            .expect("decoded value must fit its layout");
        assert_eq!(layout.decode(&packed).ok(), Some(mixed));
    }
});
