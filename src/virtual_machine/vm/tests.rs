use super::*;
use crate::virtual_machine::assembler::assemble_source;
use crate::virtual_machine::isa::InstrClass;

const SEED: u64 = 0x5EED;
const STEP_LIMIT: u64 = 100_000;

fn new_vm(config: ExecConfig) -> VM {
    VM::with_memory(config, Memory::with_seed(SEED))
}

fn run_program(program: &Program, config: ExecConfig) -> Result<VM, VMError> {
    let mut vm = new_vm(config);
    vm.load(program)?;
    vm.run()?;
    Ok(vm)
}

fn run_vm(source: &str) -> VM {
    let program = assemble_source(source).expect("assembly failed");
    run_program(&program, ExecConfig::default().with_max_steps(STEP_LIMIT)).expect("vm run failed")
}

fn run_expect_err(source: &str) -> VMError {
    let program = assemble_source(source).expect("assembly failed");
    match run_program(&program, ExecConfig::default().with_max_steps(STEP_LIMIT)) {
        Ok(_) => panic!("expected failure"),
        Err(e) => e,
    }
}

fn run_bytes_expect_err(code: Vec<u8>) -> VMError {
    match run_program(&Program::from_bytes(code), ExecConfig::default()) {
        Ok(_) => panic!("expected failure"),
        Err(e) => e,
    }
}

fn reg(vm: &VM, r: Register) -> u32 {
    vm.registers().get(r)
}

// ==================== Setup ====================

#[test]
fn initial_state() {
    let vm = new_vm(ExecConfig::default());
    assert_eq!(reg(&vm, Register::XX), DEFAULT_ENTRY);
    assert_eq!(reg(&vm, Register::F5), DEFAULT_FRAME);
    assert_eq!(reg(&vm, Register::F0), 0);
    assert!(!vm.registers().flag());
    let mut memory = vm.memory().clone();
    assert_eq!(memory.read32(DEFAULT_FRAME), DEFAULT_RETURN_ADDRESS);
}

#[test]
fn empty_return_only_program() {
    let vm = run_vm("krz f5@ xx");
    assert_eq!(reg(&vm, Register::XX), DEFAULT_RETURN_ADDRESS);
    assert_eq!(vm.profile().instructions(), 1);
    assert!(vm.debug_output().is_empty());
}

#[test]
fn load_rejects_image_past_top_of_memory() {
    let mut vm = new_vm(ExecConfig::default());
    let err = vm.load(&Program::new(0xFFFF_FFFE, vec![0; 4])).unwrap_err();
    assert!(matches!(err, VMError::ProgramTooLarge { base: 0xFFFF_FFFE, len: 4 }));
    assert!(vm.load(&Program::new(0xFFFF_FFFC, vec![0; 4])).is_ok());
}

// ==================== Arithmetic and logic ====================

#[test]
fn end_to_end_krz() {
    let vm = run_vm("krz 42 f0 krz f5@ xx");
    assert_eq!(reg(&vm, Register::F0), 42);
    assert_eq!(reg(&vm, Register::XX), DEFAULT_RETURN_ADDRESS);
}

#[test]
fn ata_nta_wrap() {
    let vm = run_vm(
        "krz 4294967295 f0 ata 2 f0
         krz 0 f1 nta 1 f1
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 1);
    assert_eq!(reg(&vm, Register::F1), u32::MAX);
}

#[test]
fn bitwise_ops() {
    let vm = run_vm(
        "krz 12 f0 ada 10 f0
         krz 12 f1 ekc 10 f1
         krz 12 f2 dal 10 f2
         krz 0 f3 nac f3
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 8);
    assert_eq!(reg(&vm, Register::F1), 14);
    assert_eq!(reg(&vm, Register::F2), !(12 ^ 10));
    assert_eq!(reg(&vm, Register::F3), u32::MAX);
}

#[test]
fn sum_loop() {
    let vm = run_vm(
        "krz 0 f0
         krz 1 f1
         nll loop
         ata f1 f0
         ata 1 f1
         fi f1 10 xtlonys
         malkrz loop xx
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 55);
    assert_eq!(reg(&vm, Register::F1), 11);
}

#[test]
fn loop_back_to_suffix_label() {
    let vm = run_vm(
        "krz 0 f0
         ata 1 f0 l' loop
         fi f0 5 xtlonys
         malkrz loop xx
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 6);
}

#[test]
fn forward_jump_skips_code() {
    let vm = run_vm(
        "krz skip xx
         krz 1 f0
         nll skip
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 0);
}

#[test]
fn destination_first_source() {
    let vm = run_vm("'c'i krz f0 9 ata f0 1 krz xx f5@");
    assert_eq!(reg(&vm, Register::F0), 10);
}

// ==================== Shifts ====================

#[test]
fn shifts_in_range() {
    let vm = run_vm(
        "krz 2147483648 f0 dto 4 f0
         krz 2147483648 f1 dtosna 4 f1
         krz 1 f2 dro 31 f2
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 0x0800_0000);
    assert_eq!(reg(&vm, Register::F1), 0xF800_0000);
    assert_eq!(reg(&vm, Register::F2), 0x8000_0000);
}

#[test]
fn shifts_past_width() {
    let vm = run_vm(
        "krz 4294967295 f0 dto 32 f0
         krz 4294967295 f1 dro 33 f1
         krz 2147483648 f2 dtosna 40 f2
         krz 1073741824 f3 dtosna 32 f3
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 0);
    assert_eq!(reg(&vm, Register::F1), 0);
    assert_eq!(reg(&vm, Register::F2), u32::MAX);
    assert_eq!(reg(&vm, Register::F3), 0);
}

// ==================== Flag ====================

#[test]
fn comparison_then_malkrz() {
    let vm = run_vm(
        "fi 1 2 xylonys malkrz 5 f0
         fi 2 1 xylonys malkrz 5 f1
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 5);
    assert_eq!(reg(&vm, Register::F1), 0);
}

#[test]
fn any_store_clears_flag() {
    let vm = run_vm(
        "fi 3 3 clo krz 0 f2 malkrz 1 f0
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 0);
    assert!(!vm.registers().flag());
}

#[test]
fn malkrz_consumes_flag() {
    let vm = run_vm(
        "fi 3 3 clo malkrz 1 f0 malkrz 2 f1
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 1);
    assert_eq!(reg(&vm, Register::F1), 0);
}

#[test]
fn comparison_operand_order() {
    // flag = first OP second
    let vm = run_vm(
        "fi 5 3 llonys malkrz 1 f0
         fi 5 3 xolonys malkrz 1 f1
         fi 5 3 xtlonys malkrz 1 f2
         fi 5 5 niv malkrz 1 f3
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 1);
    assert_eq!(reg(&vm, Register::F1), 1);
    assert_eq!(reg(&vm, Register::F2), 0);
    assert_eq!(reg(&vm, Register::F3), 0);
}

#[test]
fn signed_and_unsigned_comparisons_differ() {
    let vm = run_vm(
        "krz 4294967295 f0
         fi f0 0 llonys malkrz 1 f1
         fi f0 0 llo malkrz 1 f2
         fi f0 0 xylo malkrz 1 f3
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F1), 1);
    assert_eq!(reg(&vm, Register::F2), 0);
    assert_eq!(reg(&vm, Register::F3), 1);
}

#[test]
fn comparison_leaves_operands_untouched() {
    let vm = run_vm("krz 7 f0 fi f0 9 xolo krz f5@ xx");
    assert_eq!(reg(&vm, Register::F0), 7);
}

// ==================== Multiply and exchange ====================

#[test]
fn lat_unsigned_product() {
    let vm = run_vm(
        "krz 4294967295 f0 krz 4294967295 f1
         lat f0 f1 f2
         krz f5@ xx",
    );
    // (2^32 - 1)^2 = 0xFFFFFFFE_00000001
    assert_eq!(reg(&vm, Register::F1), 1);
    assert_eq!(reg(&vm, Register::F2), 0xFFFF_FFFE);
}

#[test]
fn latsna_signed_product() {
    let vm = run_vm(
        "krz 4294967295 f0 krz 4294967295 f1
         latsna f0 f1 f2
         krz 2 f3 krz 4294967293 f4
         latsna f3 f4 f6
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F1), 1);
    assert_eq!(reg(&vm, Register::F2), 0);
    // 2 * -3
    assert_eq!(reg(&vm, Register::F4), (-6i32) as u32);
    assert_eq!(reg(&vm, Register::F6), u32::MAX);
}

#[test]
fn lat_to_same_register_keeps_low_word() {
    let vm = run_vm("krz 65536 f0 krz 65536 f1 lat f0 f1 f1 krz f5@ xx");
    // high word lands first, then the low word overwrites it
    assert_eq!(reg(&vm, Register::F1), 0);
}

#[test]
fn inj_rotates_values() {
    let vm = run_vm(
        "krz 1 f0 krz 2 f1 krz 3 f2
         inj f0 f1 f2
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 1);
    assert_eq!(reg(&vm, Register::F1), 1);
    assert_eq!(reg(&vm, Register::F2), 2);
}

#[test]
fn inj_as_call() {
    // xx = target, f6 = address after the inj
    let vm = run_vm(
        "inj target xx f6
         krz 3 f1
         krz f5@ xx
         nll target
         krz 9 f0
         krz f6 xx",
    );
    assert_eq!(reg(&vm, Register::F0), 9);
    assert_eq!(reg(&vm, Register::F1), 3);
}

// ==================== Partial width transfers ====================

#[test]
fn krz8i_sign_extends_top_byte() {
    let vm = run_vm(
        "krz 4278190080 f0 krz8i f0 f1
         krz8i 200 f2
         krz8i 2130706432 f3
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F1), u32::MAX);
    assert_eq!(reg(&vm, Register::F2), 0xFFFF_FFC8);
    assert_eq!(reg(&vm, Register::F3), 127);
}

#[test]
fn krz16i_sign_extends_top_half() {
    let vm = run_vm(
        "krz 2147483648 f0 krz16i f0 f1
         krz16i 32769 f2
         krz16i 4660 f3
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F1), 0xFFFF_8000);
    assert_eq!(reg(&vm, Register::F2), 0xFFFF_8001);
    assert_eq!(reg(&vm, Register::F3), 0x1234);
}

#[test]
fn krz8c_krz16c_replace_top_bits() {
    let vm = run_vm(
        "krz 305419896 f0 krz8c 171 f0
         krz 305419896 f1 krz16c 48879 f1
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 0xAB34_5678);
    assert_eq!(reg(&vm, Register::F1), 0xBEEF_5678);
}

#[test]
fn partial_transfers_through_memory() {
    let vm = run_vm(
        "krz 0 f5+8@ krz8c 171 f5+8@ krz f5+8@ f0
         krz 0 f5+12@ krz16c 48879 f5+12@ krz f5+12@ f1
         krz 4278190080 f5+16@ krz8i f5+16@ f2
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 0xAB00_0000);
    assert_eq!(reg(&vm, Register::F1), 0xBEEF_0000);
    assert_eq!(reg(&vm, Register::F2), u32::MAX);
}

// ==================== Memory ====================

#[test]
fn addressing_forms() {
    let vm = run_vm(
        "krz 8 f1 krz 99 f5+f1@ krz f5+8@ f0
         krz f5 f2 ata 12 f2 krz 7 f2@ krz f5+12@ f3
         krz 4 f4 krz 11 4+f5@ krz f5+f4@ f6
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), 99);
    assert_eq!(reg(&vm, Register::F3), 7);
    assert_eq!(reg(&vm, Register::F6), 11);
}

#[test]
fn words_are_big_endian_in_memory() {
    let vm = run_vm("krz 305419896 f5+8@ krz f5+8@ f0 krz f5@ xx");
    assert_eq!(reg(&vm, Register::F0), 0x1234_5678);
    let snapshot = vm.memory().snapshot();
    let at = DEFAULT_FRAME + 8;
    assert_eq!(
        (at..at + 4).map(|a| snapshot[&a]).collect::<Vec<_>>(),
        vec![0x12, 0x34, 0x56, 0x78]
    );
}

#[test]
fn first_touch_is_stable() {
    let vm = run_vm(
        "krz 1000 f1 krz f1@ f0 krz f1@ f2
         krz f5@ xx",
    );
    assert_eq!(reg(&vm, Register::F0), reg(&vm, Register::F2));
}

#[test]
fn same_seed_same_fill() {
    let a = run_vm("krz 1000 f1 krz f1@ f0 krz f5@ xx");
    let b = run_vm("krz 1000 f1 krz f1@ f0 krz f5@ xx");
    assert_eq!(reg(&a, Register::F0), reg(&b, Register::F0));
}

#[test]
fn image_is_visible_in_memory() {
    let vm = run_vm("krz 42 f0 krz f5@ xx");
    let snapshot = vm.memory().snapshot();
    assert_eq!(snapshot[&DEFAULT_ENTRY], Instruction::Krz as u8);
    assert_eq!(snapshot[&(DEFAULT_ENTRY + 2)], 42);
}

// ==================== Debug trap ====================

#[test]
fn debug_trap_emits_and_resumes() {
    let vm = run_vm(
        "nta 8 f5
         krz 42 f5+4@
         krz after f5@
         krz 3126834864 xx
         nll after
         krz 7 f5+4@
         krz done f5@
         krz 3126834864 xx
         nll done
         ata 8 f5
         krz f5@ xx",
    );
    assert_eq!(vm.debug_output(), ["42", "7"]);
    assert_eq!(vm.profile().traps(), 2);
    assert_eq!(reg(&vm, Register::F5), DEFAULT_FRAME);
}

#[test]
fn debug_trap_at_custom_address() {
    let config = ExecConfig {
        debug_trap: 0x4000,
        ..ExecConfig::default()
    };
    let program = assemble_source(
        "nta 8 f5 krz 5 f5+4@ krz back f5@ krz 16384 xx
         nll back ata 8 f5 krz f5@ xx",
    )
    .unwrap();
    let vm = run_program(&program, config).unwrap();
    assert_eq!(vm.debug_output(), ["5"]);
}

// ==================== Errors ====================

#[test]
fn invalid_opcode_reports_pc() {
    let err = run_bytes_expect_err(vec![0xFF]);
    assert!(matches!(
        err,
        VMError::InvalidInstruction { opcode: 0xFF, pc } if pc == DEFAULT_ENTRY
    ));

    let err = run_bytes_expect_err(vec![0x08, 0x04, 0x01, 0x00, 0x30]);
    assert!(matches!(
        err,
        VMError::InvalidInstruction { opcode: 0x30, pc } if pc == DEFAULT_ENTRY + 4
    ));
}

#[test]
fn unsupported_addressing_reports_pc() {
    let err = run_bytes_expect_err(vec![0x08, 0x08, 0x00]);
    assert!(matches!(
        err,
        VMError::UnsupportedAddressing { mode: 0x08, pc, .. } if pc == DEFAULT_ENTRY
    ));

    let err = run_bytes_expect_err(vec![0x08, 0x04, 0x01, 0x00, 0x00, 0x00, 0x2F]);
    assert!(matches!(
        err,
        VMError::UnsupportedAddressing { reg: 1, mode: 0x0F, pc } if pc == DEFAULT_ENTRY + 4
    ));
}

#[test]
fn immediate_destination_fails_at_runtime() {
    // KRZ 1, 2 cannot be produced by the assembler
    let err = run_bytes_expect_err(vec![0x08, 0x04, 0x01, 0x04, 0x02]);
    assert!(matches!(
        err,
        VMError::InvalidDestination { instruction: "KRZ", mode: 0x04, pc } if pc == DEFAULT_ENTRY
    ));
}

#[test]
fn step_limit_stops_infinite_loop() {
    let err = run_expect_err("nll loop krz loop xx");
    assert!(matches!(err, VMError::StepLimitExceeded { limit: STEP_LIMIT, .. }));
}

// ==================== Profile ====================

#[test]
fn profile_counts_by_class() {
    let vm = run_vm("krz 1 f0 ata 1 f0 fi f0 2 clo lat f0 f0 f1 krz f5@ xx");
    let counts: Vec<(InstrClass, u64)> = vm.profile().iter().filter(|(_, n)| *n > 0).collect();
    assert_eq!(
        counts,
        vec![
            (InstrClass::Arithmetic, 1),
            (InstrClass::Transfer, 2),
            (InstrClass::Compare, 1),
            (InstrClass::Multiply, 1),
        ]
    );
    assert_eq!(vm.profile().instructions(), 5);
}
