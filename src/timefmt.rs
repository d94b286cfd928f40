//! Modem timestamp handling.
//!
//! SIM7600-class modems report local time as `YY/MM/DD,HH:MM:SS±QQ` where
//! `±QQ` is a signed count of **quarter-hours** offset from UTC (so `-32`
//! means UTC-8, not minus 32 hours). Everything that orders messages goes
//! through [`sortable_value`] on a UTC timestamp; local timestamps are kept
//! only for display. Parsing never fails hard: malformed input yields the
//! `0` sentinel (sorts oldest) or a pass-through string.

/// Numeric sort key for a modem timestamp.
///
/// Composes `year*1e10 + month*1e8 + day*1e6 + hour*1e4 + minute*1e2 + second`
/// so numeric ordering equals chronological ordering. Two-digit years expand
/// as `<50 => 20xx`, else `19xx`. Returns `0` for anything unparseable or
/// out of range.
pub fn sortable_value(timestamp: &str) -> u64 {
    let Some((date, time)) = timestamp.split_once(',') else {
        return 0;
    };
    let Some((year, month, day)) = parse_date(date) else {
        return 0;
    };
    let Some((hour, minute, second)) = parse_time(strip_zone(time)) else {
        return 0;
    };
    if !(1..=12).contains(&month)
        || !(1..=31).contains(&day)
        || hour > 23
        || minute > 59
        || second > 59
    {
        return 0;
    }
    year as u64 * 10_000_000_000
        + month as u64 * 100_000_000
        + day as u64 * 1_000_000
        + hour as u64 * 10_000
        + minute as u64 * 100
        + second as u64
}

/// Convert a local modem timestamp to its UTC form.
///
/// `"26/01/04,19:04:26-32"` becomes `"26/01/05,03:04:26+00:00"`. The
/// quarter-hour offset is subtracted from the time-of-day; minute-of-day
/// underflow/overflow rolls the date by one calendar day. Inputs without a
/// zone suffix are assumed already-UTC and get `+00:00` appended.
pub fn to_utc(local: &str) -> String {
    if local.is_empty() {
        return String::new();
    }
    let Some((date, time)) = local.split_once(',') else {
        return format!("{local}+00:00");
    };
    // Zone marker is the first sign character after the seconds field.
    let Some(tz_pos) = time.find(['-', '+']) else {
        return format!("{local}+00:00");
    };
    let (clock, zone) = time.split_at(tz_pos);
    let quarters: i32 = zone.parse().unwrap_or(0);
    let Some((hour, minute, second)) = parse_time(clock) else {
        return format!("{local}+00:00");
    };

    let mut minute_of_day = hour as i32 * 60 + minute as i32 - quarters * 15;
    let date = if minute_of_day < 0 {
        minute_of_day += 24 * 60;
        previous_day(date)
    } else if minute_of_day >= 24 * 60 {
        minute_of_day -= 24 * 60;
        next_day(date)
    } else {
        date.to_string()
    };

    format!(
        "{},{:02}:{:02}:{:02}+00:00",
        date,
        minute_of_day / 60,
        minute_of_day % 60,
        second
    )
}

/// Short display form: `"26/01/04,19:04:26-32"` -> `"19:04"`.
pub fn display_short(timestamp: &str) -> String {
    let Some((_, time)) = timestamp.split_once(',') else {
        return timestamp.to_string();
    };
    let clock = strip_zone(time);
    match clock.rfind(':') {
        Some(last) if clock.find(':') != Some(last) => clock[..last].to_string(),
        _ => clock.to_string(),
    }
}

/// Filename-safe id: `"25/12/25,17:48:42-32"` -> `"251225_174842"`.
///
/// Derived from the timestamp with separators stripped; used as the storage
/// id for incoming records so a re-observed message maps to the same file.
pub fn file_id(timestamp: &str) -> String {
    let Some((date, time)) = timestamp.split_once(',') else {
        return String::new();
    };
    let date: String = date.chars().filter(|c| c.is_ascii_digit()).collect();
    let clock: String = strip_zone(time)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if date.is_empty() || clock.is_empty() {
        return String::new();
    }
    format!("{date}_{clock}")
}

fn parse_date(date: &str) -> Option<(u32, u32, u32)> {
    let mut parts = date.split('/');
    let year: u32 = parts.next()?.trim().parse().ok()?;
    let month: u32 = parts.next()?.trim().parse().ok()?;
    let day: u32 = parts.next()?.trim().parse().ok()?;
    let year = if year < 50 {
        year + 2000
    } else if year < 100 {
        year + 1900
    } else {
        year
    };
    Some((year, month, day))
}

fn parse_time(clock: &str) -> Option<(u32, u32, u32)> {
    let mut parts = clock.split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    let second: u32 = parts.next()?.trim().parse().ok()?;
    Some((hour, minute, second))
}

fn strip_zone(time: &str) -> &str {
    match time.find(['-', '+']) {
        Some(pos) => &time[..pos],
        None => time,
    }
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn next_day(date: &str) -> String {
    let Some((year, month, day)) = parse_date(date) else {
        return date.to_string();
    };
    let (mut year, mut month, mut day) = (year, month, day + 1);
    if day > days_in_month(year, month) {
        day = 1;
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    format!("{:02}/{:02}/{:02}", year % 100, month, day)
}

fn previous_day(date: &str) -> String {
    let Some((year, month, day)) = parse_date(date) else {
        return date.to_string();
    };
    let (mut year, mut month, mut day) = (year, month, day.saturating_sub(1));
    if day == 0 {
        month = if month == 1 { 12 } else { month - 1 };
        if month == 12 {
            year -= 1;
        }
        day = days_in_month(year, month);
    }
    format!("{:02}/{:02}/{:02}", year % 100, month, day)
}
