//! Fuzz target: `FlatRecord::from_bytes` and the flat → value conversion.
//!
//! Arbitrary bytes must either fail to parse or produce a record whose
//! conversion either succeeds or reports an invalid status.
//!
//! cargo fuzz run fuzz_flat_record

#![no_main]

use libfuzzer_sys::fuzz_target;
use propbus::error::ValueError;
use propbus::property::{FlatRecord, PropertyValue, WireEncoding, WireValue};

fuzz_target!(|data: &[u8]| {
    let Ok(record) = FlatRecord::from_bytes(data) else {
        return;
    };
    let status = record.status;
    match PropertyValue::try_from(WireValue::Flat(record)) {
        Ok(value) => {
            // A decoded value re-encodes without loss.
            let again = PropertyValue::try_from(value.to_wire(WireEncoding::Flat));
            assert_eq!(again.as_ref(), Ok(&value));
        }
        Err(e) => assert_eq!(e, ValueError::InvalidStatus(status)),
    }
});
