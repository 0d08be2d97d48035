//! Day-schedule compilation: hourly, interval and list source forms all
//! reduce to a per-minute profile which [`redistribute`] folds into the
//! per-timestep day table.

use crate::core::units::{HOURS_PER_DAY, MINUTES_PER_DAY, MINUTES_PER_HOUR};
use crate::errors::ErrorCollector;
use crate::input::{InterpolationInput, NumericType, UntilEntry};
use anyhow::{anyhow, bail};

/// A compiled day table: one value per sub-hour step per clock hour.
#[derive(Clone, Debug)]
pub struct DaySchedule {
    pub name: String,
    pub type_limits: Option<usize>,
    pub interpolation: InterpolationInput,
    values: Vec<f64>,
    steps_per_hour: usize,
}

impl DaySchedule {
    pub(crate) fn from_step_values(
        name: String,
        type_limits: Option<usize>,
        interpolation: InterpolationInput,
        values: Vec<f64>,
        steps_per_hour: usize,
    ) -> Self {
        debug_assert_eq!(values.len(), steps_per_hour * HOURS_PER_DAY as usize);
        Self {
            name,
            type_limits,
            interpolation,
            values,
            steps_per_hour,
        }
    }

    /// Constant-value day table.
    pub(crate) fn constant(
        name: String,
        type_limits: Option<usize>,
        value: f64,
        steps_per_hour: usize,
    ) -> Self {
        Self::from_step_values(
            name,
            type_limits,
            InterpolationInput::No,
            vec![value; steps_per_hour * HOURS_PER_DAY as usize],
            steps_per_hour,
        )
    }

    /// Value for clock hour 1..=24 at sub-hour step 1..=steps_per_hour.
    pub fn value_at(&self, hour: u32, step: usize) -> anyhow::Result<f64> {
        if hour < 1 || hour > HOURS_PER_DAY {
            bail!("Hour {hour} is out of range 1-24 for day schedule '{}'", self.name);
        }
        if step < 1 || step > self.steps_per_hour {
            bail!(
                "Timestep {step} is out of range 1-{} for day schedule '{}'",
                self.steps_per_hour,
                self.name
            );
        }
        Ok(self.values[(hour as usize - 1) * self.steps_per_hour + (step - 1)])
    }

    pub fn step_values(&self) -> &[f64] {
        &self.values
    }

    pub fn min(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Fold a per-minute day profile into per-timestep values.
///
/// "Average" takes the arithmetic mean of the minutes falling in each output
/// step; "No" and "Linear" snap to the value at the end-of-step minute (for
/// "Linear" the ramp was already built into the minute profile).
pub fn redistribute(
    minute_values: &[f64],
    interpolation: InterpolationInput,
    steps_per_hour: usize,
) -> Vec<f64> {
    debug_assert_eq!(minute_values.len(), MINUTES_PER_DAY as usize);
    let minutes_per_step = MINUTES_PER_HOUR as usize / steps_per_hour;
    let step_count = steps_per_hour * HOURS_PER_DAY as usize;
    (0..step_count)
        .map(|step| {
            let begin = step * minutes_per_step;
            let end = begin + minutes_per_step;
            match interpolation {
                InterpolationInput::Average => {
                    minute_values[begin..end].iter().sum::<f64>() / minutes_per_step as f64
                }
                InterpolationInput::No | InterpolationInput::Linear => minute_values[end - 1],
            }
        })
        .collect()
}

/// Parse an "HH:MM" token into the minute-of-day it closes (1..=1440).
pub(crate) fn parse_until_time(token: &str) -> anyhow::Result<u32> {
    let cleaned = token.trim();
    let (hh, mm) = cleaned
        .split_once(':')
        .ok_or_else(|| anyhow!("Malformed time '{cleaned}', expected HH:MM"))?;
    let hours: u32 = hh
        .trim()
        .parse()
        .map_err(|_| anyhow!("Malformed hour in time '{cleaned}'"))?;
    let minutes: u32 = mm
        .trim()
        .parse()
        .map_err(|_| anyhow!("Malformed minute in time '{cleaned}'"))?;
    if hours > HOURS_PER_DAY || minutes >= MINUTES_PER_HOUR || (hours == HOURS_PER_DAY && minutes != 0)
    {
        bail!("Time '{cleaned}' is outside 00:01-24:00");
    }
    let total = hours * MINUTES_PER_HOUR + minutes;
    if total == 0 {
        bail!("Time '{cleaned}' must be after 00:00");
    }
    Ok(total)
}

/// Build the per-minute profile from ordered "until minute, value" pairs.
/// Coverage must be exact: strictly increasing boundaries finishing at 24:00.
/// The minute exactly on a boundary belongs to the interval it closes.
pub(crate) fn minute_profile_from_intervals(
    intervals: &[(u32, f64)],
    interpolation: InterpolationInput,
) -> anyhow::Result<Vec<f64>> {
    if intervals.is_empty() {
        bail!("No intervals given");
    }
    let mut minutes = vec![0.0; MINUTES_PER_DAY as usize];
    let mut previous_until = 0u32;
    let mut previous_value = intervals[0].1;
    for &(until, value) in intervals {
        if until <= previous_until {
            bail!(
                "Interval boundary {until} minutes overlaps or repeats the previous boundary {previous_until}"
            );
        }
        let span = (until - previous_until) as f64;
        for minute in (previous_until + 1)..=until {
            let idx = (minute - 1) as usize;
            minutes[idx] = match interpolation {
                InterpolationInput::Linear => {
                    previous_value + (value - previous_value) * (minute - previous_until) as f64 / span
                }
                _ => value,
            };
        }
        previous_until = until;
        previous_value = value;
    }
    if previous_until != MINUTES_PER_DAY {
        bail!(
            "Intervals end at minute {previous_until}, leaving the day incomplete (must cover through 24:00)"
        );
    }
    Ok(minutes)
}

/// Compile an interval-form day schedule. Errors accumulate on the collector
/// with the given object context; `None` means the object was unusable.
pub(crate) fn compile_interval_day(
    name: &str,
    type_limits: Option<usize>,
    interpolation: InterpolationInput,
    entries: &[UntilEntry],
    steps_per_hour: usize,
    context: &str,
    collector: &mut ErrorCollector,
) -> Option<DaySchedule> {
    let minutes_per_step = MINUTES_PER_HOUR / steps_per_hour as u32;
    let mut parsed = Vec::with_capacity(entries.len());
    let mut unusable = false;
    for entry in entries {
        match parse_until_time(&entry.until) {
            Ok(minute) => {
                if interpolation == InterpolationInput::No && minute % minutes_per_step != 0 {
                    collector.severe(
                        context,
                        format!(
                            "Until boundary '{}' is not a multiple of the {minutes_per_step}-minute timestep",
                            entry.until
                        ),
                    );
                    unusable = true;
                }
                parsed.push((minute, entry.value));
            }
            Err(err) => {
                collector.severe(context, err);
                unusable = true;
            }
        }
    }
    if unusable {
        return None;
    }
    match minute_profile_from_intervals(&parsed, interpolation) {
        Ok(minutes) => Some(DaySchedule::from_step_values(
            name.to_string(),
            type_limits,
            interpolation,
            redistribute(&minutes, interpolation, steps_per_hour),
            steps_per_hour,
        )),
        Err(err) => {
            collector.severe(context, err);
            None
        }
    }
}

/// Compile a list-form day schedule: a fixed minutes-per-item grid covering
/// the whole day with an exact item count.
pub(crate) fn compile_list_day(
    name: &str,
    type_limits: Option<usize>,
    interpolation: InterpolationInput,
    minutes_per_item: u32,
    values: &[f64],
    steps_per_hour: usize,
    context: &str,
    collector: &mut ErrorCollector,
) -> Option<DaySchedule> {
    if minutes_per_item == 0 || MINUTES_PER_HOUR % minutes_per_item != 0 {
        collector.severe(
            context,
            format!("MinutesPerItem {minutes_per_item} does not divide 60 evenly"),
        );
        return None;
    }
    let expected = (MINUTES_PER_DAY / minutes_per_item) as usize;
    if values.len() != expected {
        collector.severe(
            context,
            format!(
                "Expected {expected} values for {minutes_per_item}-minute items, found {}",
                values.len()
            ),
        );
        return None;
    }
    let mut minutes = vec![0.0; MINUTES_PER_DAY as usize];
    for (item, &value) in values.iter().enumerate() {
        let begin = item * minutes_per_item as usize;
        for slot in minutes.iter_mut().skip(begin).take(minutes_per_item as usize) {
            *slot = value;
        }
    }
    Some(DaySchedule::from_step_values(
        name.to_string(),
        type_limits,
        interpolation,
        redistribute(&minutes, interpolation, steps_per_hour),
        steps_per_hour,
    ))
}

/// Compile an hourly-form day schedule: one value per clock hour, replicated
/// to every sub-hour step; interpolation is forced off.
pub(crate) fn compile_hourly_day(
    name: &str,
    type_limits: Option<usize>,
    hourly_values: &[f64],
    steps_per_hour: usize,
    context: &str,
    collector: &mut ErrorCollector,
) -> Option<DaySchedule> {
    if hourly_values.len() != HOURS_PER_DAY as usize {
        collector.severe(
            context,
            format!("Expected 24 hourly values, found {}", hourly_values.len()),
        );
        return None;
    }
    let values = hourly_values
        .iter()
        .flat_map(|&v| std::iter::repeat(v).take(steps_per_hour))
        .collect();
    Some(DaySchedule::from_step_values(
        name.to_string(),
        type_limits,
        InterpolationInput::No,
        values,
        steps_per_hour,
    ))
}

/// Warn (never mutate) when compiled values violate the referenced type
/// limits.
pub(crate) fn check_against_type_limits(
    day: &DaySchedule,
    limited: bool,
    lower: Option<f64>,
    upper: Option<f64>,
    numeric_type: NumericType,
    limits_name: &str,
    collector: &mut ErrorCollector,
) {
    let context = format!("DaySchedule={}", day.name);
    if limited {
        let min = day.min();
        let max = day.max();
        if let Some(lower) = lower {
            if min < lower {
                collector.warning(
                    &context,
                    format!("Value {min} is below the minimum {lower} of ScheduleTypeLimits={limits_name}"),
                );
            }
        }
        if let Some(upper) = upper {
            if max > upper {
                collector.warning(
                    &context,
                    format!("Value {max} is above the maximum {upper} of ScheduleTypeLimits={limits_name}"),
                );
            }
        }
    }
    if numeric_type == NumericType::Discrete
        && day.step_values().iter().any(|v| v.fract() != 0.0)
    {
        collector.warning(
            &context,
            format!("Fractional value present but ScheduleTypeLimits={limits_name} is Discrete"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rstest::*;

    fn entry(until: &str, value: f64) -> UntilEntry {
        UntilEntry {
            until: until.to_string(),
            value,
        }
    }

    #[rstest]
    #[case("08:00", 480)]
    #[case("24:00", 1440)]
    #[case("00:30", 30)]
    fn until_times_parse(#[case] token: &str, #[case] minute: u32) {
        assert_eq!(parse_until_time(token).unwrap(), minute);
    }

    #[rstest]
    #[case("8am")]
    #[case("25:00")]
    #[case("12:75")]
    #[case("24:30")]
    #[case("00:00")]
    fn malformed_until_times_error(#[case] token: &str) {
        assert!(parse_until_time(token).is_err());
    }

    /// Boundary exactly at 08:00 belongs to the "Until 08:00" bucket.
    #[rstest]
    fn interval_reconstruction_round_trip() {
        let mut collector = ErrorCollector::new();
        let day = compile_interval_day(
            "Step Day",
            None,
            InterpolationInput::No,
            &[entry("08:00", 0.0), entry("24:00", 1.0)],
            4,
            "Schedule:Day:Interval=Step Day",
            &mut collector,
        )
        .unwrap();
        assert!(!collector.has_fatals());
        for hour in 1..=24u32 {
            for step in 1..=4usize {
                let end_minute = (hour - 1) * 60 + step as u32 * 15;
                let expected = if end_minute <= 480 { 0.0 } else { 1.0 };
                assert_eq!(
                    day.value_at(hour, step).unwrap(),
                    expected,
                    "wrong value at hour {hour} step {step} (minute {end_minute})"
                );
            }
        }
    }

    #[rstest]
    fn incomplete_day_is_fatal() {
        let mut collector = ErrorCollector::new();
        let day = compile_interval_day(
            "Short Day",
            None,
            InterpolationInput::No,
            &[entry("18:00", 1.0)],
            1,
            "Schedule:Day:Interval=Short Day",
            &mut collector,
        );
        assert!(day.is_none());
        assert!(collector.has_fatals());
    }

    #[rstest]
    fn overlapping_intervals_are_fatal() {
        let mut collector = ErrorCollector::new();
        let day = compile_interval_day(
            "Backwards Day",
            None,
            InterpolationInput::Average,
            &[entry("12:00", 1.0), entry("09:00", 2.0), entry("24:00", 0.0)],
            1,
            "Schedule:Day:Interval=Backwards Day",
            &mut collector,
        );
        assert!(day.is_none());
        assert!(collector.has_fatals());
    }

    /// Average interpolation computes the minute-weighted mean of straddled
    /// segments, not a midpoint.
    #[rstest]
    fn average_interpolation_weights_by_minutes() {
        let mut collector = ErrorCollector::new();
        let day = compile_interval_day(
            "Two Segment",
            None,
            InterpolationInput::Average,
            &[entry("12:00", 0.0), entry("24:00", 4.0)],
            1,
            "Schedule:Day:Interval=Two Segment",
            &mut collector,
        )
        .unwrap();
        // hour 12 lies wholly inside the first segment
        assert_eq!(day.value_at(12, 1).unwrap(), 0.0);
        assert_eq!(day.value_at(13, 1).unwrap(), 4.0);

        // a boundary mid-hour weights by minutes on each side: 45 min of 0.0
        // and 15 min of 4.0
        let mut collector = ErrorCollector::new();
        let uneven = compile_interval_day(
            "Uneven Split",
            None,
            InterpolationInput::Average,
            &[entry("12:45", 0.0), entry("24:00", 4.0)],
            1,
            "Schedule:Day:Interval=Uneven Split",
            &mut collector,
        )
        .unwrap();
        assert_relative_eq!(uneven.value_at(13, 1).unwrap(), 4.0 * 15.0 / 60.0);
    }

    #[rstest]
    fn linear_interpolation_ramps_across_interval() {
        let mut collector = ErrorCollector::new();
        let day = compile_interval_day(
            "Ramp",
            None,
            InterpolationInput::Linear,
            &[entry("12:00", 0.0), entry("24:00", 1.0)],
            2,
            "Schedule:Day:Interval=Ramp",
            &mut collector,
        )
        .unwrap();
        // first segment holds its own value; second ramps 0 -> 1
        assert_eq!(day.value_at(6, 1).unwrap(), 0.0);
        assert_relative_eq!(day.value_at(18, 2).unwrap(), 0.5);
        assert_relative_eq!(day.value_at(24, 2).unwrap(), 1.0);
    }

    #[rstest]
    fn hourly_day_replicates_to_substeps() {
        let mut collector = ErrorCollector::new();
        let mut hourly = vec![0.0; 24];
        hourly[8] = 21.0; // hour 9
        let day = compile_hourly_day("Hourly", None, &hourly, 4, "Schedule:Day:Hourly=Hourly", &mut collector)
            .unwrap();
        for step in 1..=4 {
            assert_eq!(day.value_at(9, step).unwrap(), 21.0);
        }
        assert_eq!(day.value_at(10, 1).unwrap(), 0.0);
    }

    #[rstest]
    fn list_day_requires_exact_item_count() {
        let mut collector = ErrorCollector::new();
        let missing = compile_list_day(
            "List",
            None,
            InterpolationInput::No,
            30,
            &vec![1.0; 47],
            2,
            "Schedule:Day:List=List",
            &mut collector,
        );
        assert!(missing.is_none());
        assert!(collector.has_fatals());

        let mut collector = ErrorCollector::new();
        let day = compile_list_day(
            "List",
            None,
            InterpolationInput::No,
            30,
            &vec![2.5; 48],
            2,
            "Schedule:Day:List=List",
            &mut collector,
        )
        .unwrap();
        assert_eq!(day.value_at(1, 1).unwrap(), 2.5);
        assert_eq!(day.value_at(24, 2).unwrap(), 2.5);
    }

    #[rstest]
    fn list_day_rejects_item_size_not_dividing_hour() {
        let mut collector = ErrorCollector::new();
        let day = compile_list_day(
            "List",
            None,
            InterpolationInput::No,
            7,
            &vec![0.0; 205],
            1,
            "Schedule:Day:List=List",
            &mut collector,
        );
        assert!(day.is_none());
        assert!(collector.has_fatals());
    }

    #[rstest]
    fn type_limit_violations_warn_without_mutating() {
        let mut collector = ErrorCollector::new();
        let day = DaySchedule::constant("Over".to_string(), Some(0), 1.5, 1);
        check_against_type_limits(
            &day,
            true,
            Some(0.0),
            Some(1.0),
            NumericType::Discrete,
            "Fraction",
            &mut collector,
        );
        assert!(!collector.has_fatals());
        assert_eq!(collector.warning_count(), 2);
        assert_eq!(day.value_at(1, 1).unwrap(), 1.5);
    }
}
