use crate::error::SymbologyError;

/// Total module count of a UPC-A / EAN-13 symbol.
pub const SYMBOL_MODULES: usize = 95;

const START_GUARD: &str = "101";
const CENTER_GUARD: &str = "01010";
const END_GUARD: &str = "101";

const L_CODES: [&str; 10] = [
    "0001101", "0011001", "0010011", "0111101", "0100011", "0110001", "0101111", "0111011",
    "0110111", "0001011",
];

const G_CODES: [&str; 10] = [
    "0100111", "0110011", "0011011", "0100001", "0011101", "0111001", "0000101", "0010001",
    "0001001", "0010111",
];

const R_CODES: [&str; 10] = [
    "1110010", "1100110", "1101100", "1000010", "1011100", "1001110", "1010000", "1000100",
    "1001000", "1110100",
];

/// Left-half parity per lead digit.
const PARITY: [&str; 10] = [
    "LLLLLL", "LLGLGG", "LLGGLG", "LLGGGL", "LGLLGG", "LGGLLG", "LGGGLL", "LGLGLG", "LGLGGL",
    "LGGLGL",
];

/// Returns true when module `index` belongs to one of the three guard patterns.
pub fn is_guard_module(index: usize) -> bool {
    index <= 2 || (45..=49).contains(&index) || (92..=94).contains(&index)
}

/// Encodes a 12-digit UPC-A or 13-digit EAN-13 code as 95 `'0'`/`'1'` modules.
///
/// UPC-A input is encoded as its EAN-13 equivalent (leading zero), which
/// yields the identical bar pattern.
pub fn encode_modules(code: &str) -> Result<String, SymbologyError> {
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(code));
    }
    let ean = match code.len() {
        12 => format!("0{}", code),
        13 => code.to_string(),
        _ => return Err(invalid(code)),
    };

    let d: Vec<usize> = ean.bytes().map(|b| (b - b'0') as usize).collect();
    let parity = PARITY[d[0]].as_bytes();

    let mut out = String::with_capacity(SYMBOL_MODULES);
    out.push_str(START_GUARD);
    for (i, &digit) in d[1..7].iter().enumerate() {
        let table = if parity[i] == b'L' { &L_CODES } else { &G_CODES };
        out.push_str(table[digit]);
    }
    out.push_str(CENTER_GUARD);
    for &digit in &d[7..13] {
        out.push_str(R_CODES[digit]);
    }
    out.push_str(END_GUARD);

    debug_assert_eq!(out.len(), SYMBOL_MODULES);
    Ok(out)
}

/// Contiguous runs of dark modules as `(start_module, length)` pairs.
pub fn dark_runs(modules: &str) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, b) in modules.bytes().enumerate() {
        match (b == b'1', start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push((s, i - s));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, modules.len() - s));
    }
    runs
}

fn invalid(code: &str) -> SymbologyError {
    SymbologyError::InvalidInput {
        input: code.to_string(),
        expected: "12 or 13 ASCII digits",
    }
}
