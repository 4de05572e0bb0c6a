//! Fuzz target for JWKS parsing.
//!
//! Arbitrary bytes must either parse into a valid key set or fail with a
//! typed validation error — never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tokengate::Jwks;

fuzz_target!(|data: &[u8]| {
    if let Ok(jwks) = Jwks::parse(data) {
        // Lookup must be total over whatever parsed.
        let _ = jwks.find("kid");
        for key in &jwks.keys {
            let _ = key.valid_kid();
            let _ = key.assert_signature_use();
        }
    }
});
