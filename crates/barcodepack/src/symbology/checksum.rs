use crate::error::SymbologyError;

fn digits(input: &str, len: usize, expected: &'static str) -> Result<Vec<u8>, SymbologyError> {
    if input.len() != len || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SymbologyError::InvalidInput {
            input: input.to_string(),
            expected,
        });
    }
    Ok(input.bytes().map(|b| b - b'0').collect())
}

/// UPC-A check digit for an 11-digit base.
///
/// Digits at even zero-based positions weigh 3, the rest weigh 1.
pub fn upc_check_digit(base11: &str) -> Result<u8, SymbologyError> {
    let d = digits(base11, 11, "11 ASCII digits")?;
    let total: u32 = d
        .iter()
        .enumerate()
        .map(|(i, &v)| if i % 2 == 0 { 3 * v as u32 } else { v as u32 })
        .sum();
    Ok(((10 - total % 10) % 10) as u8)
}

/// EAN-13 check digit for 12 data digits, weights alternating 1, 3 from the left.
pub fn ean13_check_digit(data12: &str) -> Result<u8, SymbologyError> {
    let d = digits(data12, 12, "12 ASCII digits")?;
    let total: u32 = d
        .iter()
        .enumerate()
        .map(|(i, &v)| if i % 2 == 0 { v as u32 } else { 3 * v as u32 })
        .sum();
    Ok(((10 - total % 10) % 10) as u8)
}

/// Full 12-digit UPC-A code for an 11-digit base.
pub fn upc12_from_base(base11: &str) -> Result<String, SymbologyError> {
    let check = upc_check_digit(base11)?;
    Ok(format!("{}{}", base11, check))
}

/// EAN-13 equivalent of a UPC-A code: a leading zero plus a recomputed check digit.
pub fn ean13_from_upc12(upc12: &str) -> Result<String, SymbologyError> {
    digits(upc12, 12, "12 ASCII digits")?;
    let data = format!("0{}", &upc12[..11]);
    let check = ean13_check_digit(&data)?;
    Ok(format!("{}{}", data, check))
}
