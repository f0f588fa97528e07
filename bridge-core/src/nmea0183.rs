//! NMEA 0183 sentence assembly and checksum handling.
//!
//! Sentences are `$TTFFF,field,...*hh\r\n` where `hh` is the XOR of every
//! byte between `$` and `*`. This module builds outgoing sentences and
//! verifies injected ones; field semantics live in [`crate::encoder`].

use crate::ValidationError;

/// Sentence terminator.
pub const TERMINATOR: &str = "\r\n";

/// XOR checksum over a sentence body (the bytes between `$` and `*`).
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Assemble a complete sentence from talker, formatter and fields.
///
/// `make_sentence("GP", "RMC", &fields)` yields `$GPRMC,...*hh\r\n`.
pub fn make_sentence(talker: &str, formatter: &str, fields: &[String]) -> String {
    let body = if fields.is_empty() {
        format!("{}{}", talker, formatter)
    } else {
        format!("{}{},{}", talker, formatter, fields.join(","))
    };
    format!("${}*{:02X}{}", body, checksum(&body), TERMINATOR)
}

/// Verify an incoming or injected sentence: framing, printable-ASCII body,
/// plausible address field and a matching checksum.
pub fn verify(sentence: &str) -> Result<(), ValidationError> {
    let trimmed = sentence.trim_end_matches(['\r', '\n']);
    let rest = trimmed
        .strip_prefix('$')
        .ok_or_else(|| ValidationError::Sentence("missing '$' start".to_string()))?;

    let star = rest
        .rfind('*')
        .ok_or_else(|| ValidationError::Sentence("missing '*' checksum delimiter".to_string()))?;
    let (body, cs_field) = rest.split_at(star);
    let cs_field = &cs_field[1..];

    if cs_field.len() != 2 || !cs_field.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::Sentence(format!(
            "bad checksum field '{}'",
            cs_field
        )));
    }
    if body.is_empty() || !body.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Err(ValidationError::Sentence(
            "body contains non-printable characters".to_string(),
        ));
    }

    // Address field: 2-char talker + 3-char formatter, or proprietary P...
    let address = body.split(',').next().unwrap_or("");
    let address_ok = (address.len() == 5 && address.chars().all(|c| c.is_ascii_uppercase()))
        || (address.starts_with('P')
            && address.len() >= 4
            && address.chars().all(|c| c.is_ascii_alphanumeric()));
    if !address_ok {
        return Err(ValidationError::Sentence(format!(
            "unrecognized address field '{}'",
            address
        )));
    }

    let expected = checksum(body);
    let provided = u8::from_str_radix(cs_field, 16)
        .map_err(|_| ValidationError::Sentence("unparseable checksum".to_string()))?;
    if expected != provided {
        return Err(ValidationError::Sentence(format!(
            "checksum mismatch: computed {:02X}, sentence says {:02X}",
            expected, provided
        )));
    }
    Ok(())
}

/// Format a latitude as `ddmm.mmmm` plus hemisphere.
pub fn format_latitude(lat: f64) -> (String, char) {
    let hemi = if lat < 0.0 { 'S' } else { 'N' };
    let abs = lat.abs();
    let degrees = abs.trunc();
    let minutes = (abs - degrees) * 60.0;
    (format!("{:02}{:07.4}", degrees as u32, minutes), hemi)
}

/// Format a longitude as `dddmm.mmmm` plus hemisphere.
pub fn format_longitude(lon: f64) -> (String, char) {
    let hemi = if lon < 0.0 { 'W' } else { 'E' };
    let abs = lon.abs();
    let degrees = abs.trunc();
    let minutes = (abs - degrees) * 60.0;
    (format!("{:03}{:07.4}", degrees as u32, minutes), hemi)
}

/// Format a UTC time-of-day field (`hhmmss.ss`) from milliseconds since
/// midnight.
pub fn format_time_of_day(ms_of_day: u64) -> String {
    let ms = ms_of_day % 86_400_000;
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) as f64 / 1000.0;
    format!("{:02}{:02}{:05.2}", hours, minutes, seconds)
}
