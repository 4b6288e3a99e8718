use proptest::prelude::*;

use dvrx_core::config::KeystreamSpec;
use dvrx_core::dibit::{pack_bits_into_bytes, unpack_bytes_into_bits};
use dvrx_core::modulation::Modulation;
use dvrx_core::source::{Retuner, SampleSource, SyntheticSource};
use dvrx_core::symbol::SymbolExtractor;
use dvrx_core::sync::dibit_hamming;

proptest! {
    /// Packing N bits into bytes and unpacking them again yields the
    /// original bits, for any N.
    #[test]
    fn pack_unpack_roundtrip(bits in prop::collection::vec(0u8..2, 0..256)) {
        let bytes = pack_bits_into_bytes(&bits);
        let back = unpack_bytes_into_bits(&bytes, bits.len());
        prop_assert_eq!(back, bits);
    }

    /// Dibit Hamming distance is a metric on equal-length words.
    #[test]
    fn hamming_metric_properties(
        a in prop::collection::vec(0u8..4, 24),
        b in prop::collection::vec(0u8..4, 24),
        c in prop::collection::vec(0u8..4, 24),
    ) {
        prop_assert_eq!(dibit_hamming(&a, &a), 0);
        prop_assert_eq!(dibit_hamming(&a, &b), dibit_hamming(&b, &a));
        prop_assert!(
            dibit_hamming(&a, &c) <= dibit_hamming(&a, &b) + dibit_hamming(&b, &c)
        );
    }

    /// The slicer's decision for a prefix never depends on later samples.
    #[test]
    fn slicer_is_causal(
        prefix in prop::collection::vec(-3.0f32..3.0, 1..200),
        suffix in prop::collection::vec(-3.0f32..3.0, 0..200),
    ) {
        let mut a = SymbolExtractor::new(10);
        let mut b = SymbolExtractor::new(10);
        a.warm_start(-3.0, 3.0);
        b.warm_start(-3.0, 3.0);

        let symbols_a: Vec<_> = prefix.iter().filter_map(|&s| a.push_sample(s)).collect();

        let mut symbols_b: Vec<_> = prefix.iter().filter_map(|&s| b.push_sample(s)).collect();
        for &s in &suffix {
            if let Some(v) = b.push_sample(s) {
                symbols_b.push(v);
            }
        }

        prop_assert_eq!(&symbols_a[..], &symbols_b[..symbols_a.len()]);

        // Same prefix symbols slice to the same dibits.
        for &s in &symbols_a {
            prop_assert_eq!(
                a.slice(s, Modulation::C4fm).dibit,
                b.slice(s, Modulation::C4fm).dibit
            );
        }
    }

    /// Every parseable keystream spec re-parses from its own fields.
    #[test]
    fn keystream_spec_parse_is_stable(
        bits in 1u16..=882,
        bytes in prop::collection::vec(0u8..=255, 1..16),
        offset in 0u32..1000,
        step in 1u32..200,
    ) {
        let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
        let spec_str = format!("{}:{}:{}:{}", bits, hex, offset, step);
        let parsed = KeystreamSpec::parse(&spec_str).unwrap();
        prop_assert_eq!(parsed.bits, bits);
        prop_assert_eq!(parsed.offset, offset);
        prop_assert_eq!(parsed.step, step);
        prop_assert_eq!(parsed.ks_bits.len(), bits as usize);

        let reparsed = KeystreamSpec::parse(&spec_str).unwrap();
        prop_assert_eq!(parsed, reparsed);
    }
}

/// Calling `tune(f)` twice within the coalescing window is
/// observationally equivalent to calling it once.
#[test]
fn tune_idempotent_within_window() {
    let source = SyntheticSource::new(vec![0], 48_000, true);
    let mut retuner = Retuner::new(source);

    for _ in 0..5 {
        retuner.tune(851_000_000).unwrap();
    }
    assert_eq!(retuner.into_inner().tunes, vec![851_000_000]);
}
