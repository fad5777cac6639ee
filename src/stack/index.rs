//! Time and z indices encoded in file names.
//!
//! An acquisition named `cells_t3_z12.ptu` is time point 3, slice 12. The
//! markers may appear anywhere in the stem, in any order.

/// Parse the `_t<digits>` and `_z<digits>` indices of a file stem.
///
/// The first match of each marker wins. A missing marker yields `None`,
/// never zero.
pub fn parse_indices(stem: &str) -> (Option<u32>, Option<u32>) {
    (find_index(stem, b't'), find_index(stem, b'z'))
}

/// First `_<axis><digits>` in `stem` whose digits fit in a `u32`.
fn find_index(stem: &str, axis: u8) -> Option<u32> {
    let bytes = stem.as_bytes();
    let mut start = 0;
    while start + 2 < bytes.len() {
        if bytes[start] == b'_' && bytes[start + 1] == axis {
            let digits = &bytes[start + 2..];
            let len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
            if len > 0 {
                // Digits are ASCII, so the slice is valid UTF-8
                if let Ok(value) = stem[start + 2..start + 2 + len].parse::<u32>() {
                    return Some(value);
                }
            }
        }
        start += 1;
    }
    None
}
