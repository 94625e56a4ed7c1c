use crate::Error;
use std::ops::Range;

/// Placeholder values written before the real offsets are known. Their
/// printed width bounds the offsets the real list can hold.
pub(crate) const PLACEHOLDER_BYTE_RANGE: [i64; 4] = [0, 1_000_000_000, 1_000_000_000, 1_000_000_000];
/// Bytes reserved for the CMS container (hex encoded it takes twice that).
pub(crate) const CONTENTS_CAPACITY: usize = 9000;
/// Zeros of the placeholder that are matched to locate it.
const MATCHED_ZEROS: usize = 51;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange(pub Vec<usize>);

impl ByteRange {
    pub fn to_list(&self, fixed_width: usize) -> Result<String, Error> {
        let list_string = self
            .0
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        if fixed_width < list_string.len() {
            Err(Error::from(format!(
                "ByteRange `fixed_width` is to small. Current: `{}`, Expected at least: `{}`",
                fixed_width,
                list_string.len()
            )))
        } else {
            Ok(format!(
                "{}{}",
                list_string,
                " ".repeat(fixed_width - list_string.len())
            ))
        }
    }

    pub fn get_range(&self, range_pair_index: usize) -> Result<Range<usize>, Error> {
        let index = range_pair_index * 2;
        match (self.0.get(index), self.0.get(index + 1)) {
            (Some(&start), Some(&len)) => start
                .checked_add(len)
                .map(|end| start..end)
                .ok_or_else(|| Error::Other(format!("ByteRange pair {} overflows", range_pair_index))),
            _ => Err(Error::Other(format!(
                "ByteRange has no pair {} in {:?}",
                range_pair_index, self.0
            ))),
        }
    }

    pub fn get_capacity_inclusive(&self) -> usize {
        self.0.iter().skip(1).step_by(2).sum()
    }

    /// Concatenate the covered parts of `data`.
    pub fn signed_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut signed = Vec::with_capacity(self.get_capacity_inclusive());
        for pair in 0..self.0.len() / 2 {
            let range = self.get_range(pair)?;
            let part = data.get(range.clone()).ok_or_else(|| {
                Error::Other(format!(
                    "ByteRange {:?} exceeds the file length {}",
                    range,
                    data.len()
                ))
            })?;
            signed.extend_from_slice(part);
        }
        Ok(signed)
    }

    /// True when the ranges start at zero, end at `file_len` and leave out
    /// nothing but the single `Contents` gap.
    pub fn covers_whole_file(&self, file_len: usize) -> bool {
        if self.0.len() != 4 {
            return false;
        }
        match (self.get_range(0), self.get_range(1)) {
            (Ok(first), Ok(second)) => {
                first.start == 0 && first.end < second.start && second.end == file_len
            }
            _ => false,
        }
    }
}

impl From<Vec<(u64, u64)>> for ByteRange {
    fn from(pairs: Vec<(u64, u64)>) -> Self {
        ByteRange(
            pairs
                .into_iter()
                .flat_map(|(start, len)| [start as usize, len as usize])
                .collect(),
        )
    }
}

fn placeholder_list() -> String {
    PLACEHOLDER_BYTE_RANGE.map(|v| v.to_string()).join(" ")
}

fn placeholder_pattern() -> Vec<u8> {
    let mut pattern = format!("/ByteRange[{}]/Contents<", placeholder_list()).into_bytes();
    // Just add the first part, rest will be okay
    pattern.extend_from_slice(&[b'0'; MATCHED_ZEROS]);
    pattern
}

/// Replace the placeholder `ByteRange` with the real offsets around the
/// `Contents` hex string. The file length does not change.
pub(crate) fn set_next_byte_range(mut pdf_file_data: Vec<u8>) -> Result<(ByteRange, Vec<u8>), Error> {
    let pattern = placeholder_pattern();
    let found_at = find_binary_pattern(&pdf_file_data, &pattern).ok_or_else(|| {
        Error::Other("Signature placeholder `ByteRange` not found in the output.".to_owned())
    })?;

    // The real list is padded to the placeholder width.
    let fixed_width = placeholder_list().len();
    let hex_len = 2 * CONTENTS_CAPACITY;
    // Offset of `<`
    let content_offset = found_at + b"/ByteRange[]/Contents".len() + fixed_width;
    let after_content = content_offset + hex_len + 2;
    let byte_range = ByteRange(vec![
        0,
        content_offset,
        after_content,
        pdf_file_data.len().checked_sub(after_content).ok_or_else(|| {
            Error::Other("Signature placeholder is truncated.".to_owned())
        })?,
    ]);

    let new_byte_range_string = format!(
        "/ByteRange[{}]/Contents<{}",
        byte_range.to_list(fixed_width)?,
        "0".repeat(MATCHED_ZEROS)
    )
    .into_bytes();
    debug_assert_eq!(new_byte_range_string.len(), pattern.len());

    pdf_file_data.splice(
        found_at..(found_at + new_byte_range_string.len()),
        new_byte_range_string,
    );

    Ok((byte_range, pdf_file_data))
}

/// Write `content` hex encoded at the start of the reserved `Contents`.
pub(crate) fn set_content(
    mut pdf_file_data: Vec<u8>,
    byte_range: &ByteRange,
    content: &[u8],
) -> Result<Vec<u8>, Error> {
    let content_offset = byte_range
        .0
        .get(1)
        .copied()
        .ok_or_else(|| Error::Other("ByteRange is incomplete.".to_owned()))?;
    let available = byte_range.0.get(2).copied().unwrap_or(0).saturating_sub(content_offset + 2);
    let hex_content = hex::encode(content);
    if hex_content.len() > available {
        return Err(Error::Other(format!(
            "Length of content is to long. Available: {}, Needed: {}",
            available / 2,
            content.len()
        )));
    }
    if pdf_file_data.get(content_offset) != Some(&b'<') {
        return Err(Error::Other(
            "ByteRange does not point at the `Contents` string.".to_owned(),
        ));
    }
    let start = content_offset + 1;
    pdf_file_data.splice(start..start + hex_content.len(), hex_content.into_bytes());
    Ok(pdf_file_data)
}

/// Finds the first instance matching the pattern.
pub(crate) fn find_binary_pattern(bytes: &[u8], pattern: &[u8]) -> Option<usize> {
    if bytes.is_empty() || pattern.is_empty() {
        return None;
    }
    bytes
        .windows(pattern.len())
        .position(|window| window == pattern)
}
