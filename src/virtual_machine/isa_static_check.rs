#[cfg(test)]
mod tests {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    /// Fingerprint of the opcode table. Assembled images depend on it, so a
    /// change here must be deliberate.
    const EXPECTED_ISA_HASH: u64 = 8189529735447295237;

    fn fnv1a64(mut h: u64, bytes: &[u8]) -> u64 {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    macro_rules! hash_isa {
        (
            $( $(#[$doc:meta])* $name:ident = $opcode:expr, $mnemonic:literal => [ $( $field:ident ),* $(,)? ], $class:ident ),* $(,)?
        ) => {{
            let mut h = FNV_OFFSET;
            $(
                h = fnv1a64(h, stringify!($name).as_bytes());
                h = fnv1a64(h, &[crate::virtual_machine::isa::Instruction::$name as u8]);
                h = fnv1a64(h, $mnemonic.as_bytes());
                $( h = fnv1a64(h, stringify!($field).as_bytes()); )*
                h = fnv1a64(h, stringify!($class).as_bytes());
            )*
            h
        }};
    }

    fn current_isa_hash() -> u64 {
        crate::for_each_instruction!(hash_isa)
    }

    #[test]
    #[ignore]
    fn print_isa_hash() {
        println!("ISA_HASH={}", current_isa_hash());
    }

    #[test]
    fn isa_hash_unchanged() {
        assert_eq!(current_isa_hash(), EXPECTED_ISA_HASH);
    }
}
