//! CNPJ (14-digit national tax identifier) normalization and check-digit validation.

const IDENTIFIER_LEN: usize = 14;

const FIRST_DIGIT_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_DIGIT_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Strips every non-digit character and left-pads with zeros to 14 digits.
///
/// Never truncates: inputs with more than 14 digits come back longer than 14.
pub fn pad_identifier(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{:0>width$}", digits, width = IDENTIFIER_LEN)
}

/// Normalizes `raw` and returns it only when both check digits are correct.
///
/// Returns `None` when the padded value is not exactly 14 digits, when all
/// digits are identical (`00000000000000`, `11111111111111`, ...), or when
/// the trailing two digits don't match the weighted modulo-11 computation.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let padded = pad_identifier(raw);
    if padded.len() != IDENTIFIER_LEN {
        return None;
    }

    let digits: Vec<u32> = padded.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return None;
    }

    let first = check_digit(&digits[..12], &FIRST_DIGIT_WEIGHTS);
    let second = check_digit(&digits[..13], &SECOND_DIGIT_WEIGHTS);

    if digits[12] == first && digits[13] == second {
        Some(padded)
    } else {
        None
    }
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let rest = sum % 11;
    if rest < 2 { 0 } else { 11 - rest }
}
