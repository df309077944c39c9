#![no_main]
use libfuzzer_sys::fuzz_target;

use lifter_engine::decompose::decompose;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(program) = lifter_dsl::parse(s, "fuzz.lift") {
            if let Ok(op) = lifter_ir::lowering::lower(&program) {
                // Whatever lowers must decompose with a lifting fraction in [0, 1].
                if let Ok(d) = decompose(&op) {
                    assert!((0.0..=1.0).contains(&d.lifting));
                }
            }
        }
    }
});
