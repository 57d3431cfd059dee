use time::{Date, Month, PrimitiveDateTime, Time};

/// Decodes a FAT-style packed date and time.  Returns `None` if the fields
/// do not name a real calendar date and time of day.
pub fn datetime_from_bits(date: u16, time: u16) -> Option<PrimitiveDateTime> {
    let year = 1980 + (date >> 9) as i32;
    let month = Month::try_from(((date >> 5) & 0x0f) as u8).ok()?;
    let day = (date & 0x1f) as u8;

    let hour = (time >> 11) as u8;
    let minute = ((time >> 5) & 0x3f) as u8;
    let second = 2 * (time & 0x1f) as u8;

    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}
