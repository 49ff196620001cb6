/*!
 # Schedule encodings for firmware

 Two ahead-of-time output shapes are supported:

 * **Packed binary**: one little-endian `u64` per event, holding
   `(timestamp << 1) | state`.
 * **Static table**: a named C constant holding the base epoch, the event
   count and `{ delta, state }` pairs relative to that epoch.
*/

use tracing::{debug, instrument};

use crate::schedule::{CompiledSchedule, ScheduleEvent};
use crate::{Error, Result};

/// Maximum size of an encoded schedule, in bytes
pub const MAX_PACKED_BYTES: usize = 65536;

/// Size of one packed record
const RECORD_SIZE: usize = 8;

/// Timestamps that survive the one-bit shift of a packed record
const PACKABLE: std::ops::RangeInclusive<i64> = (i64::MIN >> 1)..=(i64::MAX >> 1);

fn check_budget(schedule: &CompiledSchedule) -> Result<()> {
    let size = schedule.len() * RECORD_SIZE;
    if size > MAX_PACKED_BYTES {
        return Err(Error::ScheduleTooLarge {
            size,
            max: MAX_PACKED_BYTES,
        });
    }
    Ok(())
}

/// Packs every event into an 8-byte little-endian record.
///
/// Fails instead of truncating when the result would exceed
/// [`MAX_PACKED_BYTES`], or when a timestamp needs more than 63 bits.
#[instrument(skip(schedule), fields(events = schedule.len()))]
pub fn encode_packed(schedule: &CompiledSchedule) -> Result<Vec<u8>> {
    check_budget(schedule)?;

    let mut out = Vec::with_capacity(schedule.len() * RECORD_SIZE);
    for event in schedule.events() {
        if !PACKABLE.contains(&event.timestamp) {
            return Err(Error::TimestampOutOfRange(event.timestamp));
        }
        let word = ((event.timestamp as u64) << 1) | u64::from(event.state);
        out.extend_from_slice(&word.to_le_bytes());
    }

    debug!("Packed {} events into {} bytes", schedule.len(), out.len());
    Ok(out)
}

/// Decodes records produced by [`encode_packed`]
pub fn decode_packed(bytes: &[u8]) -> Result<CompiledSchedule> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(Error::MalformedPacked(bytes.len()));
    }

    let events = bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut word = [0u8; RECORD_SIZE];
            word.copy_from_slice(chunk);
            let word = u64::from_le_bytes(word);
            // Arithmetic shift keeps pre-1970 timestamps intact
            ScheduleEvent::new((word as i64) >> 1, word & 1 == 1)
        })
        .collect();

    Ok(CompiledSchedule::new(events))
}

/// Renders the schedule as a named static table.
///
/// ```text
/// static const schedule_t schedule_level_1 = { 1755186900ull, 3,
///     {
///         { 0, 1 },
///         { 32700, 0 },
///         { 61500, 0 },
///     } };
/// ```
#[instrument(skip(schedule), fields(events = schedule.len()))]
pub fn encode_header(name: &str, schedule: &CompiledSchedule) -> Result<String> {
    check_budget(schedule)?;
    let epoch = schedule.epoch().ok_or(Error::EmptySchedule)?;

    let mut out = format!(
        "static const schedule_t {name} = {{ {}ull, {},\n",
        epoch as u64,
        schedule.len()
    );
    out.push_str("    {\n");
    for event in schedule.events() {
        out.push_str(&format!(
            "        {{ {}, {} }},\n",
            event.timestamp - epoch,
            u8::from(event.state)
        ));
    }
    out.push_str("    } };\n");

    debug!("Rendered table '{}' ({} bytes)", name, out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompiledSchedule {
        CompiledSchedule::new(vec![
            ScheduleEvent::new(1_755_186_900, true),
            ScheduleEvent::new(1_755_219_600, false),
            ScheduleEvent::new(1_755_248_400, false),
        ])
    }

    #[test]
    fn packed_layout() {
        let bytes = encode_packed(&sample()).unwrap();
        assert_eq!(bytes.len(), 24);

        let first = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        assert_eq!(first, (1_755_186_900u64 << 1) | 1);
        let second = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(second, 1_755_219_600u64 << 1);
    }

    #[test]
    fn packed_decodes_back() {
        let schedule = sample();
        let decoded = decode_packed(&encode_packed(&schedule).unwrap()).unwrap();
        assert_eq!(decoded, schedule);
    }

    #[test]
    fn negative_timestamps_survive() {
        let schedule = CompiledSchedule::new(vec![ScheduleEvent::new(-86_400, true)]);
        let decoded = decode_packed(&encode_packed(&schedule).unwrap()).unwrap();
        assert_eq!(decoded, schedule);
    }

    #[test]
    fn oversized_timestamps_are_rejected() {
        let limit = i64::MAX >> 1;
        let edge = CompiledSchedule::new(vec![
            ScheduleEvent::new(limit, true),
            ScheduleEvent::new(i64::MIN >> 1, false),
        ]);
        let decoded = decode_packed(&encode_packed(&edge).unwrap()).unwrap();
        assert_eq!(decoded, edge);

        for timestamp in [1i64 << 62, i64::MAX, (i64::MIN >> 1) - 1] {
            let schedule = CompiledSchedule::new(vec![ScheduleEvent::new(timestamp, true)]);
            let err = encode_packed(&schedule).unwrap_err();
            assert!(matches!(err, Error::TimestampOutOfRange(t) if t == timestamp));
        }
    }

    #[test]
    fn budget_allows_exactly_8192_events() {
        let events = (0..8192).map(|i| ScheduleEvent::new(i, i % 2 == 0)).collect();
        let bytes = encode_packed(&CompiledSchedule::new(events)).unwrap();
        assert_eq!(bytes.len(), MAX_PACKED_BYTES);
    }

    #[test]
    fn budget_overflow_fails() {
        let events = (0..8193).map(|i| ScheduleEvent::new(i, true)).collect();
        let schedule = CompiledSchedule::new(events);

        let err = encode_packed(&schedule).unwrap_err();
        assert!(matches!(
            err,
            Error::ScheduleTooLarge {
                size: 65544,
                max: 65536
            }
        ));
        assert!(encode_header("too_big", &schedule).is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let err = decode_packed(&[0u8; 12]).unwrap_err();
        assert!(matches!(err, Error::MalformedPacked(12)));
    }

    #[test]
    fn header_table() {
        let header = encode_header("schedule_level_1", &sample()).unwrap();
        assert_eq!(
            header,
            "static const schedule_t schedule_level_1 = { 1755186900ull, 3,\n\
             \x20   {\n\
             \x20       { 0, 1 },\n\
             \x20       { 32700, 0 },\n\
             \x20       { 61500, 0 },\n\
             \x20   } };\n"
        );
    }

    #[test]
    fn header_needs_an_epoch() {
        let err = encode_header("empty", &CompiledSchedule::default()).unwrap_err();
        assert!(matches!(err, Error::EmptySchedule));
    }
}
