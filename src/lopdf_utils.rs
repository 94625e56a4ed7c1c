use crate::Error;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use lopdf::{Object, StringFormat};

fn missing(what: &str) -> Error {
    Error::Other(format!("PDF entry `{}` is missing", what))
}

pub(crate) fn as_option_name(obj: Option<&Object>) -> Result<Option<String>, Error> {
    Ok(obj
        .map(|obj| obj.as_name_str())
        .transpose()?
        .map(|s| s.to_owned()))
}

pub(crate) fn as_option_byte_string(obj: Option<&Object>) -> Result<Option<Vec<u8>>, Error> {
    Ok(obj
        .map(|obj| obj.as_str())
        .transpose()?
        .map(|s| s.to_owned()))
}

pub(crate) fn as_byte_string(obj: Option<&Object>, key: &str) -> Result<Vec<u8>, Error> {
    as_option_byte_string(obj)?.ok_or_else(|| missing(key))
}

/// Decode a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, else
/// UTF-8 with a Latin-1 fallback.
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = utf16
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], *pair.get(1).unwrap_or(&0)]))
            .collect::<Vec<u16>>();
        return String::from_utf16_lossy(&units);
    }
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Encode a text string, ASCII as is, anything else as UTF-16BE with BOM.
pub(crate) fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn as_option_text_string(obj: Option<&Object>) -> Result<Option<String>, Error> {
    Ok(as_option_byte_string(obj)?.map(|bytes| decode_text_string(&bytes)))
}

pub(crate) fn as_byte_range(obj: Option<&Object>) -> Result<Vec<(u64, u64)>, Error> {
    let list = obj.ok_or_else(|| missing("ByteRange"))?.as_array()?;
    if list.len() % 2 != 0 {
        log::warn!("Expected pairs, got an uneven length.");
    }
    let mut result = Vec::new();
    for pair in list.chunks_exact(2) {
        result.push((u64::try_from(pair[0].as_i64()?)?, u64::try_from(pair[1].as_i64()?)?));
    }
    Ok(result)
}

/// `D:YYYYMMDDHHmmSS+HH'mm'` in UTC.
pub(crate) fn format_pdf_date(time: &DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Parse a PDF date. Missing trailing fields take their lowest value and a
/// missing offset means UTC.
pub(crate) fn parse_pdf_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("D:").unwrap_or(raw);
    let digits_len = raw.chars().take_while(|c| c.is_ascii_digit()).count();
    let digits = &raw[..digits_len];
    let field = |start: usize, default: u32| -> Option<u32> {
        match digits.get(start..start + 2) {
            Some(value) => value.parse().ok(),
            None => Some(default),
        }
    };
    let year = digits.get(0..4)?.parse::<i32>().ok()?;
    let (month, day) = (field(4, 1)?, field(6, 1)?);
    let (hour, minute, second) = (field(8, 0)?, field(10, 0)?, field(12, 0)?);

    let rest = &raw[digits_len..];
    let offset_seconds = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz = rest[1..]
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>();
            let hours = tz.get(0..2).and_then(|h| h.parse::<i32>().ok()).unwrap_or(0);
            let minutes = tz.get(2..4).and_then(|m| m.parse::<i32>().ok()).unwrap_or(0);
            let seconds = hours * 3600 + minutes * 60;
            if sign == '-' {
                -seconds
            } else {
                seconds
            }
        }
        _ => 0,
    };
    FixedOffset::east_opt(offset_seconds)?
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_pdf_dates() {
        let date = parse_pdf_date("D:20240517093000+02'00'").unwrap();
        assert_eq!(date.hour(), 9);
        assert_eq!(date.offset().local_minus_utc(), 7200);
        let date = parse_pdf_date("D:20240517093000Z").unwrap();
        assert_eq!(date.offset().local_minus_utc(), 0);
        let date = parse_pdf_date("D:2024").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        let date = parse_pdf_date("D:20240517093000-05'30").unwrap();
        assert_eq!(date.offset().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert!(parse_pdf_date("garbage").is_none());
        assert!(parse_pdf_date("D:20241340").is_none());
    }

    #[test]
    fn formatted_dates_parse_back() {
        let now = Utc.with_ymd_and_hms(2023, 11, 2, 18, 4, 5).unwrap();
        let parsed = parse_pdf_date(&format_pdf_date(&now)).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn text_strings() {
        assert_eq!(decode_text_string(b"plain"), "plain");
        let encoded = text_string("Zürich");
        let Object::String(bytes, StringFormat::Hexadecimal) = encoded else {
            panic!("expected a hexadecimal string");
        };
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_text_string(&bytes), "Zürich");
        assert_eq!(decode_text_string(&[0x5A, 0xFC]), "Zü");
    }

    #[test]
    fn byte_range_pairs() {
        let obj = Object::Array(vec![
            Object::Integer(0),
            Object::Integer(10),
            Object::Integer(20),
            Object::Integer(5),
        ]);
        assert_eq!(as_byte_range(Some(&obj)).unwrap(), vec![(0, 10), (20, 5)]);
        assert!(as_byte_range(None).is_err());
    }
}
