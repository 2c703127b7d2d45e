use raster8::machine::{Machine, MachineConfig};
use serde::Deserialize;

/// Golden register/cycle trace: each row is the CPU state at the moment
/// the instruction at `pc` is about to execute, nestest-log style.
#[derive(Debug, Deserialize, PartialEq, Eq)]
struct TraceRow {
    pc: u16,
    a: u8,
    x: u8,
    y: u8,
    p: u8,
    sp: u8,
    cyc: u64,
}

// LDA #$10 / STA $00 / LDX #$05 / loop: DEX; BNE loop / NOP / spin.
const PROGRAM: &[u8] = &[
    0xA9, 0x10, // $8000 LDA #$10
    0x85, 0x00, // $8002 STA $00
    0xA2, 0x05, // $8004 LDX #$05
    0xCA, // $8006 DEX
    0xD0, 0xFD, // $8007 BNE $8006
    0xEA, // $8009 NOP
    0x4C, 0x0A, 0x80, // $800A JMP $800A
];

const GOLDEN_TRACE: &str = r#"[
    { "pc": 32768, "a": 0,  "x": 0, "y": 0, "p": 36, "sp": 253, "cyc": 7 },
    { "pc": 32770, "a": 16, "x": 0, "y": 0, "p": 36, "sp": 253, "cyc": 9 },
    { "pc": 32772, "a": 16, "x": 0, "y": 0, "p": 36, "sp": 253, "cyc": 12 },
    { "pc": 32774, "a": 16, "x": 5, "y": 0, "p": 36, "sp": 253, "cyc": 14 },
    { "pc": 32775, "a": 16, "x": 4, "y": 0, "p": 36, "sp": 253, "cyc": 16 },
    { "pc": 32774, "a": 16, "x": 4, "y": 0, "p": 36, "sp": 253, "cyc": 19 },
    { "pc": 32775, "a": 16, "x": 3, "y": 0, "p": 36, "sp": 253, "cyc": 21 },
    { "pc": 32774, "a": 16, "x": 3, "y": 0, "p": 36, "sp": 253, "cyc": 24 },
    { "pc": 32775, "a": 16, "x": 2, "y": 0, "p": 36, "sp": 253, "cyc": 26 },
    { "pc": 32774, "a": 16, "x": 2, "y": 0, "p": 36, "sp": 253, "cyc": 29 },
    { "pc": 32775, "a": 16, "x": 1, "y": 0, "p": 36, "sp": 253, "cyc": 31 },
    { "pc": 32774, "a": 16, "x": 1, "y": 0, "p": 36, "sp": 253, "cyc": 34 },
    { "pc": 32775, "a": 16, "x": 0, "y": 0, "p": 38, "sp": 253, "cyc": 36 },
    { "pc": 32777, "a": 16, "x": 0, "y": 0, "p": 38, "sp": 253, "cyc": 38 },
    { "pc": 32778, "a": 16, "x": 0, "y": 0, "p": 38, "sp": 253, "cyc": 40 },
    { "pc": 32778, "a": 16, "x": 0, "y": 0, "p": 38, "sp": 253, "cyc": 43 }
]"#;

fn nrom_image(program: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 16];
    bytes[0..4].copy_from_slice(b"NES\x1A");
    bytes[4] = 1;
    bytes[5] = 1;

    let mut prg = vec![0xEA; 0x4000];
    prg[..program.len()].copy_from_slice(program);
    prg[0x3FFC] = 0x00;
    prg[0x3FFD] = 0x80;
    bytes.extend(prg);
    bytes.extend(vec![0u8; 0x2000]);
    bytes
}

#[test]
fn golden_trace_matches_step_for_step() {
    let rows: Vec<TraceRow> = serde_json::from_str(GOLDEN_TRACE).unwrap();

    let mut machine = Machine::new(MachineConfig::default());
    machine.load("trace", &nrom_image(PROGRAM)).unwrap();
    machine.set_power(true);

    for (index, expected) in rows.iter().enumerate() {
        let state = machine.cpu_state();
        let actual = TraceRow {
            pc: state.pc,
            a: state.a,
            x: state.x,
            y: state.y,
            p: state.p,
            sp: state.sp,
            cyc: state.cycles,
        };
        assert_eq!(&actual, expected, "trace diverged at row {index}");
        machine.step_instruction();
    }
}

#[test]
fn stored_value_lands_in_ram() {
    let mut machine = Machine::new(MachineConfig::default());
    machine.load("trace", &nrom_image(PROGRAM)).unwrap();
    machine.set_power(true);

    for _ in 0..4 {
        machine.step_instruction();
    }
    assert_eq!(machine.peek(0x0000), 0x10);
}
