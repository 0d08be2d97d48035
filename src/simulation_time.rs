// This module provides the calendar and clock state that drives schedule
// lookups and reporting-window boundaries.

use crate::core::units::{DAYS_IN_MONTH, HOURS_PER_DAY, MAX_DAYS_PER_YEAR, MINUTES_PER_HOUR};
use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Sub-hour step counts that divide the hour evenly.
pub const ALLOWED_STEPS_PER_HOUR: [usize; 12] = [1, 2, 3, 4, 5, 6, 10, 12, 15, 20, 30, 60];

/// Calendar slot of Feb 29 in the 366-slot annual tables.
pub const FEB29_SLOT: u32 = 60;

/// Day categories used to select which day-schedule applies on a given date.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum DayType {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Holiday,
    SummerDesignDay,
    WinterDesignDay,
    CustomDay1,
    CustomDay2,
}

pub const ALL_DAY_TYPES: [DayType; 12] = [
    DayType::Sunday,
    DayType::Monday,
    DayType::Tuesday,
    DayType::Wednesday,
    DayType::Thursday,
    DayType::Friday,
    DayType::Saturday,
    DayType::Holiday,
    DayType::SummerDesignDay,
    DayType::WinterDesignDay,
    DayType::CustomDay1,
    DayType::CustomDay2,
];

impl DayType {
    /// Slot index into the 12-wide day-type arrays of a week definition.
    pub fn slot(&self) -> usize {
        match self {
            DayType::Sunday => 0,
            DayType::Monday => 1,
            DayType::Tuesday => 2,
            DayType::Wednesday => 3,
            DayType::Thursday => 4,
            DayType::Friday => 5,
            DayType::Saturday => 6,
            DayType::Holiday => 7,
            DayType::SummerDesignDay => 8,
            DayType::WinterDesignDay => 9,
            DayType::CustomDay1 => 10,
            DayType::CustomDay2 => 11,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DayType::Sunday => "Sunday",
            DayType::Monday => "Monday",
            DayType::Tuesday => "Tuesday",
            DayType::Wednesday => "Wednesday",
            DayType::Thursday => "Thursday",
            DayType::Friday => "Friday",
            DayType::Saturday => "Saturday",
            DayType::Holiday => "Holiday",
            DayType::SummerDesignDay => "SummerDesignDay",
            DayType::WinterDesignDay => "WinterDesignDay",
            DayType::CustomDay1 => "CustomDay1",
            DayType::CustomDay2 => "CustomDay2",
        }
    }

    pub fn is_weekday(&self) -> bool {
        matches!(
            self,
            DayType::Monday
                | DayType::Tuesday
                | DayType::Wednesday
                | DayType::Thursday
                | DayType::Friday
        )
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self, DayType::Saturday | DayType::Sunday)
    }
}

impl Display for DayType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for DayType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_DAY_TYPES
            .iter()
            .find(|dt| dt.label().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| anyhow!("'{s}' is not a recognised day type"))
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Days in the given 1-based month, always using the leap-year February so
/// that annual tables carry a Feb 29 slot.
fn days_in_month_slot(month: u32) -> u32 {
    if month == 2 {
        29
    } else {
        DAYS_IN_MONTH[(month - 1) as usize]
    }
}

/// Calendar slot (1..=366) for a month/day pair. Slots always include Feb 29
/// so the same table layout serves leap and non-leap years.
pub fn calendar_slot(month: u32, day: u32) -> anyhow::Result<u32> {
    if !(1..=12).contains(&month) {
        bail!("Month {month} is out of range 1-12");
    }
    if day < 1 || day > days_in_month_slot(month) {
        bail!("Day {day} is out of range for month {month}");
    }
    let mut slot = day;
    for m in 1..month {
        slot += days_in_month_slot(m);
    }
    Ok(slot)
}

/// Inverse of [`calendar_slot`]: (month, day) for a 1..=366 slot.
pub fn month_day_from_slot(slot: u32) -> (u32, u32) {
    debug_assert!((1..=MAX_DAYS_PER_YEAR).contains(&slot));
    let mut remaining = slot;
    for month in 1..=12u32 {
        let len = days_in_month_slot(month);
        if remaining <= len {
            return (month, remaining);
        }
        remaining -= len;
    }
    unreachable!("slot {slot} exceeds the 366-day calendar");
}

/// Coded timestamp `((month*100 + day)*100 + hour)*100 + minute`, used for
/// min/max-with-date tracking.
pub fn encode_timestamp(month: u32, day: u32, hour: u32, minute: u32) -> u32 {
    ((month * 100 + day) * 100 + hour) * 100 + minute
}

pub fn decode_timestamp(code: u32) -> (u32, u32, u32, u32) {
    let minute = code % 100;
    let hour = (code / 100) % 100;
    let day = (code / 10_000) % 100;
    let month = code / 1_000_000;
    (month, day, hour, minute)
}

/// Per-tick clock state. Hours run 1..=24 and sub-hour steps 1..=steps/hour,
/// so a tick's end minute lands on the step boundary it closes.
#[derive(Clone, Debug)]
pub struct SimulationClock {
    steps_per_hour: usize,
    leap_year: bool,
    calendar_year: i32,
    day_of_sim: u32,
    day_of_year: u32,
    hour: u32,
    timestep_in_hour: usize,
    day_type: DayType,
    dst: bool,
    warmup: bool,
    final_year: bool,
    tick_counter: u64,
}

impl SimulationClock {
    pub fn new(steps_per_hour: usize, calendar_year: i32) -> anyhow::Result<Self> {
        if !ALLOWED_STEPS_PER_HOUR.contains(&steps_per_hour) {
            bail!("Timestep count {steps_per_hour} per hour does not divide 60 minutes evenly");
        }
        Ok(Self {
            steps_per_hour,
            leap_year: is_leap_year(calendar_year),
            calendar_year,
            day_of_sim: 1,
            day_of_year: 1,
            hour: 1,
            timestep_in_hour: 1,
            day_type: DayType::Sunday,
            dst: false,
            warmup: false,
            final_year: true,
            tick_counter: 0,
        })
    }

    pub fn steps_per_hour(&self) -> usize {
        self.steps_per_hour
    }

    pub fn minutes_per_step(&self) -> u32 {
        MINUTES_PER_HOUR / self.steps_per_hour as u32
    }

    pub fn leap_year(&self) -> bool {
        self.leap_year
    }

    pub fn calendar_year(&self) -> i32 {
        self.calendar_year
    }

    pub fn day_of_sim(&self) -> u32 {
        self.day_of_sim
    }

    pub fn day_of_year(&self) -> u32 {
        self.day_of_year
    }

    pub fn month(&self) -> u32 {
        month_day_from_slot(self.day_of_year).0
    }

    pub fn day_of_month(&self) -> u32 {
        month_day_from_slot(self.day_of_year).1
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn timestep_in_hour(&self) -> usize {
        self.timestep_in_hour
    }

    pub fn start_minute(&self) -> u32 {
        (self.timestep_in_hour as u32 - 1) * self.minutes_per_step()
    }

    pub fn end_minute(&self) -> u32 {
        self.timestep_in_hour as u32 * self.minutes_per_step()
    }

    pub fn day_type(&self) -> DayType {
        self.day_type
    }

    pub fn set_day_type(&mut self, day_type: DayType) {
        self.day_type = day_type;
    }

    pub fn dst(&self) -> bool {
        self.dst
    }

    pub fn set_dst(&mut self, dst: bool) {
        self.dst = dst;
    }

    pub fn warmup(&self) -> bool {
        self.warmup
    }

    pub fn set_warmup(&mut self, warmup: bool) {
        self.warmup = warmup;
    }

    pub fn final_year(&self) -> bool {
        self.final_year
    }

    pub fn set_final_year(&mut self, final_year: bool) {
        self.final_year = final_year;
    }

    pub fn tick_counter(&self) -> u64 {
        self.tick_counter
    }

    /// Position the clock at the start of a given calendar day.
    pub fn start_day(&mut self, day_of_year: u32, day_type: DayType) -> anyhow::Result<()> {
        if day_of_year < 1 || day_of_year > MAX_DAYS_PER_YEAR {
            bail!("Day of year {day_of_year} is out of range 1-366");
        }
        self.day_of_year = day_of_year;
        self.day_type = day_type;
        self.hour = 1;
        self.timestep_in_hour = 1;
        Ok(())
    }

    /// Advance one sub-hour timestep, rolling hour and day boundaries. The
    /// day type for a fresh day rotates through the weekday cycle; callers
    /// overriding for holidays/design days use [`Self::set_day_type`].
    pub fn advance(&mut self) {
        self.tick_counter += 1;
        if self.timestep_in_hour < self.steps_per_hour {
            self.timestep_in_hour += 1;
            return;
        }
        self.timestep_in_hour = 1;
        if self.hour < HOURS_PER_DAY {
            self.hour += 1;
            return;
        }
        self.hour = 1;
        self.day_of_sim += 1;
        self.day_of_year += 1;
        if !self.leap_year && self.day_of_year == FEB29_SLOT {
            self.day_of_year += 1;
        }
        if self.day_of_year > MAX_DAYS_PER_YEAR {
            self.day_of_year = 1;
        }
        self.day_type = match self.day_type {
            DayType::Sunday => DayType::Monday,
            DayType::Monday => DayType::Tuesday,
            DayType::Tuesday => DayType::Wednesday,
            DayType::Wednesday => DayType::Thursday,
            DayType::Thursday => DayType::Friday,
            DayType::Friday => DayType::Saturday,
            DayType::Saturday => DayType::Sunday,
            other => other,
        };
    }

    pub fn is_end_of_hour(&self) -> bool {
        self.timestep_in_hour == self.steps_per_hour
    }

    pub fn is_end_of_day(&self) -> bool {
        self.is_end_of_hour() && self.hour == HOURS_PER_DAY
    }

    pub fn is_end_of_month(&self) -> bool {
        if !self.is_end_of_day() {
            return false;
        }
        let (month, day) = month_day_from_slot(self.day_of_year);
        let month_len = if month == 2 && !self.leap_year {
            28
        } else {
            days_in_month_slot(month)
        };
        day == month_len
    }

    pub fn is_end_of_year(&self) -> bool {
        self.is_end_of_day() && self.day_of_year == MAX_DAYS_PER_YEAR
    }

    /// Coded timestamp for the current tick, stamped at the tick's end
    /// minute.
    pub fn timestamp_code(&self) -> u32 {
        let (month, day) = month_day_from_slot(self.day_of_year);
        encode_timestamp(month, day, self.hour, self.end_minute())
    }
}
