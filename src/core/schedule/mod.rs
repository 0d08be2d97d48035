//! The schedule compiler: heterogeneous schedule input forms are compiled
//! into a uniform `Annual -> Week -> Day -> per-step value` lookup structure,
//! with point queries and a per-tick cache of current values.

mod compact;
mod day;
mod file;

pub use day::{redistribute, DaySchedule};
pub use file::{FsFileLoader, ScheduleFileLoader};

use crate::core::units::{Unit, DAY_TYPE_COUNT, HOURS_PER_DAY, MAX_DAYS_PER_YEAR};
use crate::errors::{ErrorCollector, SetupError};
use crate::input::{Input, NumericType, ScheduleReportLevel};
use crate::simulation_time::{DayType, SimulationClock, ALLOWED_STEPS_PER_HOUR, ALL_DAY_TYPES};
use anyhow::{anyhow, bail};
use indexmap::IndexMap;
use itertools::Itertools;
use std::io::Write;

pub(crate) const YEAR_SLOTS: usize = MAX_DAYS_PER_YEAR as usize;

/// Validation/metadata limits referenced by schedules; never mutate values.
#[derive(Clone, Debug)]
pub struct ScheduleTypeLimits {
    pub name: String,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub numeric_type: NumericType,
    pub unit_type: Option<Unit>,
}

#[derive(Clone, Debug)]
pub struct WeekSchedule {
    pub name: String,
    pub days: [Option<usize>; DAY_TYPE_COUNT],
}

#[derive(Clone, Debug)]
pub struct AnnualSchedule {
    pub name: String,
    pub type_limits: Option<usize>,
    /// Exactly one assigned week per day 1..=366 once compilation succeeds.
    pub weeks: Vec<Option<usize>>,
}

/// Reference to a schedule: the two pseudo-schedules stand in for "no
/// schedule" sentinels without touching the compiled tables.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleRef {
    AlwaysOff,
    AlwaysOn,
    Compiled(usize),
}

#[derive(Debug)]
pub struct ScheduleRegistry {
    steps_per_hour: usize,
    leap_year: bool,
    type_limits: Vec<ScheduleTypeLimits>,
    type_limits_by_name: IndexMap<String, usize>,
    day_schedules: Vec<DaySchedule>,
    day_by_name: IndexMap<String, usize>,
    week_schedules: Vec<WeekSchedule>,
    week_by_name: IndexMap<String, usize>,
    annuals: Vec<AnnualSchedule>,
    annual_by_name: IndexMap<String, usize>,
    /// Live override for externally-driven schedules, `None` until first set.
    external_values: Vec<Option<f64>>,
    is_external: Vec<bool>,
    current_values: Vec<f64>,
    used: Vec<bool>,
}

fn name_key(name: &str) -> String {
    name.trim().to_uppercase()
}

impl ScheduleRegistry {
    pub fn new(steps_per_hour: usize, leap_year: bool) -> anyhow::Result<Self> {
        if !ALLOWED_STEPS_PER_HOUR.contains(&steps_per_hour) {
            bail!("Timestep count {steps_per_hour} per hour does not divide 60 minutes evenly");
        }
        Ok(Self {
            steps_per_hour,
            leap_year,
            type_limits: vec![],
            type_limits_by_name: Default::default(),
            day_schedules: vec![],
            day_by_name: Default::default(),
            week_schedules: vec![],
            week_by_name: Default::default(),
            annuals: vec![],
            annual_by_name: Default::default(),
            external_values: vec![],
            is_external: vec![],
            current_values: vec![],
            used: vec![],
        })
    }

    /// Compile every schedule object in the input. All validation errors for
    /// the whole pass accumulate before the result is decided.
    pub fn compile(
        input: &Input,
        loader: &dyn ScheduleFileLoader,
        leap_year: bool,
    ) -> Result<Self, SetupError> {
        let mut registry = match Self::new(input.simulation.timesteps_per_hour, leap_year) {
            Ok(registry) => registry,
            Err(err) => {
                let mut collector = ErrorCollector::new();
                collector.severe("Simulation", err);
                return Err(collector.finish().unwrap_err());
            }
        };
        let mut collector = ErrorCollector::new();

        registry.compile_type_limits(input, &mut collector);
        registry.compile_day_schedules(input, &mut collector);
        registry.compile_week_schedules(input, &mut collector);
        registry.compile_year_schedules(input, &mut collector);
        for compact_input in &input.compact_schedules {
            compact::compile_compact(&mut registry, compact_input, &mut collector);
        }
        for file_input in &input.file_schedules {
            file::compile_file_schedule(&mut registry, file_input, loader, leap_year, &mut collector);
        }
        if input.shading_file_schedules.len() > 1 {
            collector.severe(
                "Schedule:File:Shading",
                "Only one Schedule:File:Shading object is allowed per run",
            );
        } else if let Some(shading_input) = input.shading_file_schedules.first() {
            file::compile_shading_file(&mut registry, shading_input, loader, leap_year, &mut collector);
        }
        registry.compile_constant_schedules(input, &mut collector);
        registry.compile_external_schedules(input, &mut collector);

        collector.finish()?;
        Ok(registry)
    }

    fn compile_type_limits(&mut self, input: &Input, collector: &mut ErrorCollector) {
        for limits in &input.schedule_type_limits {
            let context = format!("ScheduleTypeLimits={}", limits.name);
            if let (Some(lower), Some(upper)) = (limits.lower_limit, limits.upper_limit) {
                if lower > upper {
                    collector.severe(
                        &context,
                        format!("Lower limit {lower} exceeds upper limit {upper}"),
                    );
                    continue;
                }
            }
            let unit_type = match limits.unit_type.as_deref() {
                None => None,
                Some(raw) => {
                    let resolved = Unit::from_user_string(raw);
                    if resolved.is_none() {
                        collector.warning(&context, format!("Unknown unit type '{raw}'"));
                    }
                    resolved
                }
            };
            let key = name_key(&limits.name);
            if self.type_limits_by_name.contains_key(&key) {
                collector.severe(&context, "Duplicate ScheduleTypeLimits name");
                continue;
            }
            self.type_limits_by_name.insert(key, self.type_limits.len());
            self.type_limits.push(ScheduleTypeLimits {
                name: limits.name.clone(),
                lower: limits.lower_limit,
                upper: limits.upper_limit,
                numeric_type: limits.numeric_type,
                unit_type,
            });
        }
    }

    fn compile_day_schedules(&mut self, input: &Input, collector: &mut ErrorCollector) {
        for hourly in &input.day_schedules_hourly {
            let context = format!("Schedule:Day:Hourly={}", hourly.name);
            let type_limits =
                self.resolve_type_limits(hourly.schedule_type_limits.as_deref(), &context, collector);
            if let Some(day) = day::compile_hourly_day(
                &hourly.name,
                type_limits,
                &hourly.hourly_values,
                self.steps_per_hour,
                &context,
                collector,
            ) {
                self.check_day_against_limits(&day, collector);
                self.add_day_schedule(day, &context, collector);
            }
        }
        for interval in &input.day_schedules_interval {
            let context = format!("Schedule:Day:Interval={}", interval.name);
            let type_limits =
                self.resolve_type_limits(interval.schedule_type_limits.as_deref(), &context, collector);
            if let Some(day) = day::compile_interval_day(
                &interval.name,
                type_limits,
                interval.interpolate,
                &interval.intervals,
                self.steps_per_hour,
                &context,
                collector,
            ) {
                self.check_day_against_limits(&day, collector);
                self.add_day_schedule(day, &context, collector);
            }
        }
        for list in &input.day_schedules_list {
            let context = format!("Schedule:Day:List={}", list.name);
            let type_limits =
                self.resolve_type_limits(list.schedule_type_limits.as_deref(), &context, collector);
            if let Some(day) = day::compile_list_day(
                &list.name,
                type_limits,
                list.interpolate,
                list.minutes_per_item,
                &list.values,
                self.steps_per_hour,
                &context,
                collector,
            ) {
                self.check_day_against_limits(&day, collector);
                self.add_day_schedule(day, &context, collector);
            }
        }
    }

    fn compile_week_schedules(&mut self, input: &Input, collector: &mut ErrorCollector) {
        for weekly in &input.week_schedules_daily {
            let context = format!("Schedule:Week:Daily={}", weekly.name);
            let day_names: [(&str, DayType); DAY_TYPE_COUNT] = [
                (&weekly.sunday, DayType::Sunday),
                (&weekly.monday, DayType::Monday),
                (&weekly.tuesday, DayType::Tuesday),
                (&weekly.wednesday, DayType::Wednesday),
                (&weekly.thursday, DayType::Thursday),
                (&weekly.friday, DayType::Friday),
                (&weekly.saturday, DayType::Saturday),
                (&weekly.holiday, DayType::Holiday),
                (&weekly.summer_design_day, DayType::SummerDesignDay),
                (&weekly.winter_design_day, DayType::WinterDesignDay),
                (&weekly.custom_day1, DayType::CustomDay1),
                (&weekly.custom_day2, DayType::CustomDay2),
            ];
            let mut slots: [Option<usize>; DAY_TYPE_COUNT] = [None; DAY_TYPE_COUNT];
            let mut complete = true;
            for (day_name, day_type) in day_names {
                match self.day_by_name.get(&name_key(day_name)) {
                    Some(&idx) => slots[day_type.slot()] = Some(idx),
                    None => {
                        collector.severe(
                            &context,
                            format!("Referenced day schedule '{day_name}' was not found"),
                        );
                        complete = false;
                    }
                }
            }
            if complete {
                self.add_week_schedule(
                    WeekSchedule {
                        name: weekly.name.clone(),
                        days: slots,
                    },
                    &context,
                    collector,
                );
            }
        }

        for compact_week in &input.week_schedules_compact {
            let context = format!("Schedule:Week:Compact={}", compact_week.name);
            let mut slots: [Option<usize>; DAY_TYPE_COUNT] = [None; DAY_TYPE_COUNT];
            let mut other_days_schedule = None;
            let mut usable = true;
            for entry in &compact_week.entries {
                let Some(&day_idx) = self.day_by_name.get(&name_key(&entry.day_schedule)) else {
                    collector.severe(
                        &context,
                        format!("Referenced day schedule '{}' was not found", entry.day_schedule),
                    );
                    usable = false;
                    continue;
                };
                match compact::parse_day_type_list(&entry.for_days) {
                    Ok(selection) => {
                        for day_type in &selection.types {
                            let slot = day_type.slot();
                            if slots[slot].is_some() {
                                collector.severe(
                                    &context,
                                    format!(
                                        "Day type {day_type} assigned twice within one week definition"
                                    ),
                                );
                                usable = false;
                            } else {
                                slots[slot] = Some(day_idx);
                            }
                        }
                        if selection.all_other_days {
                            other_days_schedule = Some(day_idx);
                        }
                    }
                    Err(err) => {
                        collector.severe(&context, err);
                        usable = false;
                    }
                }
            }
            if let Some(fill) = other_days_schedule {
                for slot in slots.iter_mut().filter(|s| s.is_none()) {
                    *slot = Some(fill);
                }
            }
            let missing: Vec<&str> = ALL_DAY_TYPES
                .iter()
                .filter(|dt| slots[dt.slot()].is_none())
                .map(|dt| dt.label())
                .collect();
            if !missing.is_empty() {
                collector.severe(
                    &context,
                    format!("Day types [{}] have no day schedule assigned", missing.join(", ")),
                );
                usable = false;
            }
            if usable {
                self.add_week_schedule(
                    WeekSchedule {
                        name: compact_week.name.clone(),
                        days: slots,
                    },
                    &context,
                    collector,
                );
            }
        }
    }

    fn compile_year_schedules(&mut self, input: &Input, collector: &mut ErrorCollector) {
        for year in &input.year_schedules {
            let context = format!("Schedule:Year={}", year.name);
            let type_limits =
                self.resolve_type_limits(year.schedule_type_limits.as_deref(), &context, collector);
            let mut week_for_slot: Vec<Option<usize>> = vec![None; YEAR_SLOTS];
            for period in &year.periods {
                let Some(&week_idx) = self.week_by_name.get(&name_key(&period.week_schedule)) else {
                    collector.severe(
                        &context,
                        format!("Referenced week schedule '{}' was not found", period.week_schedule),
                    );
                    continue;
                };
                let range = crate::simulation_time::calendar_slot(period.start_month, period.start_day)
                    .and_then(|start| {
                        crate::simulation_time::calendar_slot(period.end_month, period.end_day)
                            .map(|end| (start, end))
                    });
                let (start, end) = match range {
                    Ok(bounds) => bounds,
                    Err(err) => {
                        collector.severe(&context, err);
                        continue;
                    }
                };
                if start > end {
                    collector.severe(
                        &context,
                        format!(
                            "Period {}/{} - {}/{} runs backwards",
                            period.start_month, period.start_day, period.end_month, period.end_day
                        ),
                    );
                    continue;
                }
                for slot in start..=end {
                    let entry = &mut week_for_slot[(slot - 1) as usize];
                    if entry.is_some() {
                        collector.severe(
                            &context,
                            format!("Day {slot} of the year is covered by more than one period"),
                        );
                    } else {
                        *entry = Some(week_idx);
                    }
                }
            }
            compact::finalize_year_coverage(&mut week_for_slot, &context, collector);
            self.add_annual(
                AnnualSchedule {
                    name: year.name.clone(),
                    type_limits,
                    weeks: week_for_slot,
                },
                &context,
                collector,
            );
        }
    }

    fn compile_constant_schedules(&mut self, input: &Input, collector: &mut ErrorCollector) {
        for constant in &input.constant_schedules {
            self.install_broadcast_schedule(
                &constant.name,
                constant.schedule_type_limits.as_deref(),
                constant.hourly_value,
                false,
                collector,
            );
        }
    }

    fn compile_external_schedules(&mut self, input: &Input, collector: &mut ErrorCollector) {
        for external in input
            .external_schedules
            .iter()
            .chain(&input.fmu_import_schedules)
            .chain(&input.fmu_export_schedules)
        {
            self.install_broadcast_schedule(
                &external.name,
                external.schedule_type_limits.as_deref(),
                external.initial_value,
                true,
                collector,
            );
        }
    }

    /// Single scalar broadcast to all 366x24xstep cells; externally-driven
    /// schedules flip the live-override flag.
    fn install_broadcast_schedule(
        &mut self,
        name: &str,
        limits_name: Option<&str>,
        value: f64,
        external: bool,
        collector: &mut ErrorCollector,
    ) {
        let object = if external {
            "ExternalInterface:Schedule"
        } else {
            "Schedule:Constant"
        };
        let context = format!("{object}={name}");
        let type_limits = self.resolve_type_limits(limits_name, &context, collector);
        let day = DaySchedule::constant(
            format!("{name} Day"),
            type_limits,
            value,
            self.steps_per_hour,
        );
        self.check_day_against_limits(&day, collector);
        let Some(day_idx) = self.add_day_schedule(day, &context, collector) else {
            return;
        };
        let Some(week_idx) = self.add_week_schedule(
            WeekSchedule {
                name: format!("{name} Week"),
                days: [Some(day_idx); DAY_TYPE_COUNT],
            },
            &context,
            collector,
        ) else {
            return;
        };
        let annual_idx = self.add_annual(
            AnnualSchedule {
                name: name.to_string(),
                type_limits,
                weeks: vec![Some(week_idx); YEAR_SLOTS],
            },
            &context,
            collector,
        );
        if let Some(idx) = annual_idx {
            self.is_external[idx] = external;
        }
    }

    pub(crate) fn steps_per_hour(&self) -> usize {
        self.steps_per_hour
    }

    pub fn leap_year(&self) -> bool {
        self.leap_year
    }

    pub(crate) fn resolve_type_limits(
        &self,
        name: Option<&str>,
        context: &str,
        collector: &mut ErrorCollector,
    ) -> Option<usize> {
        let name = name?;
        let resolved = self.type_limits_by_name.get(&name_key(name)).copied();
        if resolved.is_none() {
            collector.warning(context, format!("Unknown ScheduleTypeLimits '{name}'"));
        }
        resolved
    }

    pub(crate) fn check_day_against_limits(&self, day: &DaySchedule, collector: &mut ErrorCollector) {
        if let Some(limits) = day.type_limits.and_then(|idx| self.type_limits.get(idx)) {
            day::check_against_type_limits(
                day,
                limits.lower.is_some() || limits.upper.is_some(),
                limits.lower,
                limits.upper,
                limits.numeric_type,
                &limits.name,
                collector,
            );
        }
    }

    pub(crate) fn add_day_schedule(
        &mut self,
        day: DaySchedule,
        context: &str,
        collector: &mut ErrorCollector,
    ) -> Option<usize> {
        let key = name_key(&day.name);
        if self.day_by_name.contains_key(&key) {
            collector.severe(context, format!("Duplicate day schedule name '{}'", day.name));
            return None;
        }
        let idx = self.day_schedules.len();
        self.day_by_name.insert(key, idx);
        self.day_schedules.push(day);
        Some(idx)
    }

    pub(crate) fn add_week_schedule(
        &mut self,
        week: WeekSchedule,
        context: &str,
        collector: &mut ErrorCollector,
    ) -> Option<usize> {
        let key = name_key(&week.name);
        if self.week_by_name.contains_key(&key) {
            collector.severe(context, format!("Duplicate week schedule name '{}'", week.name));
            return None;
        }
        let idx = self.week_schedules.len();
        self.week_by_name.insert(key, idx);
        self.week_schedules.push(week);
        Some(idx)
    }

    pub(crate) fn add_annual(
        &mut self,
        annual: AnnualSchedule,
        context: &str,
        collector: &mut ErrorCollector,
    ) -> Option<usize> {
        let key = name_key(&annual.name);
        if self.annual_by_name.contains_key(&key) {
            collector.severe(context, format!("Duplicate schedule name '{}'", annual.name));
            return None;
        }
        let idx = self.annuals.len();
        self.annual_by_name.insert(key, idx);
        self.annuals.push(annual);
        self.external_values.push(None);
        self.is_external.push(false);
        self.current_values.push(0.0);
        self.used.push(false);
        Some(idx)
    }

    pub fn schedule_ref(&self, name: &str) -> Option<ScheduleRef> {
        self.annual_by_name
            .get(&name_key(name))
            .map(|&idx| ScheduleRef::Compiled(idx))
    }

    pub fn schedule_count(&self) -> usize {
        self.annuals.len()
    }

    pub fn schedule_name(&self, sref: ScheduleRef) -> Option<&str> {
        match sref {
            ScheduleRef::Compiled(idx) => self.annuals.get(idx).map(|a| a.name.as_str()),
            _ => None,
        }
    }

    pub fn mark_used(&mut self, sref: ScheduleRef) {
        if let ScheduleRef::Compiled(idx) = sref {
            if let Some(flag) = self.used.get_mut(idx) {
                *flag = true;
            }
        }
    }

    /// Point query through Annual -> Week -> Day for an explicit date/time.
    pub fn lookup(
        &self,
        sref: ScheduleRef,
        day_of_year: u32,
        day_type: DayType,
        hour: u32,
        step: usize,
    ) -> anyhow::Result<f64> {
        let idx = match sref {
            ScheduleRef::AlwaysOff => return Ok(0.0),
            ScheduleRef::AlwaysOn => return Ok(1.0),
            ScheduleRef::Compiled(idx) => idx,
        };
        let annual = self
            .annuals
            .get(idx)
            .ok_or_else(|| anyhow!("Schedule index {idx} is out of the declared range"))?;
        if day_of_year < 1 || day_of_year > MAX_DAYS_PER_YEAR {
            bail!("Day of year {day_of_year} is out of range 1-366");
        }
        let week_idx = annual.weeks[(day_of_year - 1) as usize]
            .ok_or_else(|| anyhow!("Schedule '{}' has no week for day {day_of_year}", annual.name))?;
        let week = &self.week_schedules[week_idx];
        let day_idx = week.days[day_type.slot()].ok_or_else(|| {
            anyhow!(
                "Week schedule '{}' has no day schedule for day type {day_type}",
                week.name
            )
        })?;
        self.day_schedules[day_idx].value_at(hour, step)
    }

    /// Refresh the per-tick cache of current values. External overrides win
    /// over the compiled tables.
    pub fn update_all(&mut self, clock: &SimulationClock) -> anyhow::Result<()> {
        for idx in 0..self.annuals.len() {
            let value = match self.external_values[idx] {
                Some(value) if self.is_external[idx] => value,
                _ => self.lookup(
                    ScheduleRef::Compiled(idx),
                    clock.day_of_year(),
                    clock.day_type(),
                    clock.hour(),
                    clock.timestep_in_hour(),
                )?,
            };
            self.current_values[idx] = value;
        }
        Ok(())
    }

    /// Cached value for the current simulation instant.
    pub fn current_value(&self, sref: ScheduleRef) -> f64 {
        match sref {
            ScheduleRef::AlwaysOff => 0.0,
            ScheduleRef::AlwaysOn => 1.0,
            ScheduleRef::Compiled(idx) => self.current_values.get(idx).copied().unwrap_or(0.0),
        }
    }

    /// Live setter used once per tick by an external actor; only valid for
    /// externally-driven schedules.
    pub fn set_external_value(&mut self, sref: ScheduleRef, value: f64) -> anyhow::Result<()> {
        let ScheduleRef::Compiled(idx) = sref else {
            bail!("Only compiled external schedules accept pushed values");
        };
        if !self.is_external.get(idx).copied().unwrap_or(false) {
            bail!(
                "Schedule '{}' is not externally driven",
                self.annuals.get(idx).map(|a| a.name.as_str()).unwrap_or("?")
            );
        }
        self.external_values[idx] = Some(value);
        self.current_values[idx] = value;
        Ok(())
    }

    /// Min/max over the whole compiled year of a schedule.
    pub fn annual_min_max(&self, sref: ScheduleRef) -> anyhow::Result<(f64, f64)> {
        let idx = match sref {
            ScheduleRef::AlwaysOff => return Ok((0.0, 0.0)),
            ScheduleRef::AlwaysOn => return Ok((1.0, 1.0)),
            ScheduleRef::Compiled(idx) => idx,
        };
        let annual = self
            .annuals
            .get(idx)
            .ok_or_else(|| anyhow!("Schedule index {idx} is out of the declared range"))?;
        let day_indices: Vec<usize> = annual
            .weeks
            .iter()
            .flatten()
            .flat_map(|&week_idx| self.week_schedules[week_idx].days.iter().flatten().copied())
            .unique()
            .collect();
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for day_idx in day_indices {
            let day = &self.day_schedules[day_idx];
            min = min.min(day.min());
            max = max.max(day.max());
        }
        Ok((min, max))
    }

    /// Whether every value of the schedule falls inside [lo, hi].
    pub fn values_in_range(&self, sref: ScheduleRef, lo: f64, hi: f64) -> anyhow::Result<bool> {
        let (min, max) = self.annual_min_max(sref)?;
        Ok(min >= lo && max <= hi)
    }

    /// Schedule detail report for the eio stream, per `Output:Schedules`.
    pub fn report_details(
        &self,
        writer: &mut dyn Write,
        level: ScheduleReportLevel,
    ) -> anyhow::Result<()> {
        let per_hour = match level {
            ScheduleReportLevel::Hourly => 1,
            ScheduleReportLevel::Timestep => self.steps_per_hour,
        };
        writeln!(
            writer,
            "! <DaySchedule>,Name,ScheduleTypeLimits,Interpolated,Values 1:{}",
            per_hour * HOURS_PER_DAY as usize
        )?;
        for day in &self.day_schedules {
            let limits_name = day
                .type_limits
                .and_then(|idx| self.type_limits.get(idx))
                .map(|l| l.name.as_str())
                .unwrap_or("");
            let values = (1..=HOURS_PER_DAY)
                .cartesian_product(1..=per_hour)
                .map(|(hour, sub)| {
                    let step = match level {
                        ScheduleReportLevel::Hourly => self.steps_per_hour,
                        ScheduleReportLevel::Timestep => sub,
                    };
                    format!("{}", day.value_at(hour, step).unwrap_or(0.0))
                })
                .join(",");
            writeln!(
                writer,
                "DaySchedule,{},{},{:?},{}",
                day.name, limits_name, day.interpolation, values
            )?;
        }
        writeln!(writer, "! <WeekSchedule>,Name,DaySchedule Names 1:12")?;
        for week in &self.week_schedules {
            let day_names = week
                .days
                .iter()
                .map(|slot| {
                    slot.map(|idx| self.day_schedules[idx].name.as_str())
                        .unwrap_or("")
                })
                .join(",");
            writeln!(writer, "WeekSchedule,{},{}", week.name, day_names)?;
        }
        writeln!(writer, "! <Schedule>,Name,ScheduleTypeLimits,Weeks Used,Used")?;
        for (idx, annual) in self.annuals.iter().enumerate() {
            let limits_name = annual
                .type_limits
                .and_then(|limits_idx| self.type_limits.get(limits_idx))
                .map(|l| l.name.as_str())
                .unwrap_or("");
            let week_count = annual.weeks.iter().flatten().unique().count();
            writeln!(
                writer,
                "Schedule,{},{},{},{}",
                annual.name,
                limits_name,
                week_count,
                if self.used[idx] { "Yes" } else { "No" }
            )?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn day_schedule_by_name(&self, name: &str) -> Option<&DaySchedule> {
        self.day_by_name
            .get(&name_key(name))
            .map(|&idx| &self.day_schedules[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::file::test_support::MapFileLoader;
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::json;

    fn compile_json(value: serde_json::Value) -> Result<ScheduleRegistry, SetupError> {
        let input: Input = serde_json::from_value(value).unwrap();
        ScheduleRegistry::compile(&input, &MapFileLoader::default(), false)
    }

    fn compile_json_with_loader(
        value: serde_json::Value,
        loader: MapFileLoader,
    ) -> Result<ScheduleRegistry, SetupError> {
        let input: Input = serde_json::from_value(value).unwrap();
        ScheduleRegistry::compile(&input, &loader, false)
    }

    #[fixture]
    fn office_compact() -> serde_json::Value {
        json!({
            "Simulation": {"TimestepsPerHour": 4},
            "Schedule:Compact": [{
                "Name": "Office Occupancy",
                "Fields": [
                    "Through: 12/31",
                    "For: Weekdays",
                    "Until: 08:00", "0.0",
                    "Until: 18:00", "1.0",
                    "Until: 24:00", "0.0",
                    "For: AllOtherDays",
                    "Until: 24:00", "0.0"
                ]
            }]
        })
    }

    #[rstest]
    fn compact_schedule_compiles_with_full_coverage(office_compact: serde_json::Value) {
        let registry = compile_json(office_compact).unwrap();
        let sref = registry.schedule_ref("Office Occupancy").unwrap();
        // Weekday midday is occupied, weekend is not
        assert_eq!(
            registry.lookup(sref, 10, DayType::Monday, 12, 1).unwrap(),
            1.0
        );
        assert_eq!(
            registry.lookup(sref, 10, DayType::Sunday, 12, 1).unwrap(),
            0.0
        );
        // 08:00 itself belongs to the "Until: 08:00" interval
        assert_eq!(
            registry.lookup(sref, 10, DayType::Monday, 8, 4).unwrap(),
            0.0
        );
        assert_eq!(
            registry.lookup(sref, 10, DayType::Monday, 9, 1).unwrap(),
            1.0
        );
    }

    #[rstest]
    fn compact_schedule_with_date_gap_is_fatal() {
        let result = compile_json(json!({
            "Schedule:Compact": [{
                "Name": "Gappy",
                "Fields": [
                    "Through: 6/30",
                    "For: AllDays",
                    "Until: 24:00", "1.0"
                ]
            }]
        }));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("no week assigned"));
    }

    #[rstest]
    fn compact_missing_day_types_default_to_zero_with_warning(office_compact: serde_json::Value) {
        // remove the AllOtherDays group: remaining day types default to 0.0
        let mut value = office_compact;
        let fields = value["Schedule:Compact"][0]["Fields"].as_array_mut().unwrap();
        fields.truncate(8);
        let registry = compile_json(value).unwrap();
        let sref = registry.schedule_ref("Office Occupancy").unwrap();
        assert_eq!(
            registry.lookup(sref, 10, DayType::Holiday, 12, 1).unwrap(),
            0.0
        );
    }

    #[rstest]
    fn duplicate_schedule_names_are_fatal() {
        let result = compile_json(json!({
            "Schedule:Constant": [
                {"Name": "Dup", "HourlyValue": 1.0},
                {"Name": "DUP", "HourlyValue": 2.0}
            ]
        }));
        assert!(result.unwrap_err().to_string().contains("Duplicate"));
    }

    #[rstest]
    fn year_schedule_assembles_weeks_from_days() {
        let registry = compile_json(json!({
            "Simulation": {"TimestepsPerHour": 1},
            "Schedule:Day:Hourly": [
                {"Name": "Cold Day", "HourlyValues": vec![15.0; 24]},
                {"Name": "Warm Day", "HourlyValues": vec![25.0; 24]}
            ],
            "Schedule:Week:Daily": [
                {
                    "Name": "Cold Week",
                    "Sunday": "Cold Day", "Monday": "Cold Day", "Tuesday": "Cold Day",
                    "Wednesday": "Cold Day", "Thursday": "Cold Day", "Friday": "Cold Day",
                    "Saturday": "Cold Day", "Holiday": "Cold Day",
                    "SummerDesignDay": "Warm Day", "WinterDesignDay": "Cold Day",
                    "CustomDay1": "Cold Day", "CustomDay2": "Cold Day"
                },
                {
                    "Name": "Warm Week",
                    "Sunday": "Warm Day", "Monday": "Warm Day", "Tuesday": "Warm Day",
                    "Wednesday": "Warm Day", "Thursday": "Warm Day", "Friday": "Warm Day",
                    "Saturday": "Warm Day", "Holiday": "Warm Day",
                    "SummerDesignDay": "Warm Day", "WinterDesignDay": "Cold Day",
                    "CustomDay1": "Warm Day", "CustomDay2": "Warm Day"
                }
            ],
            "Schedule:Year": [{
                "Name": "Setpoint",
                "Periods": [
                    {"WeekSchedule": "Cold Week", "StartMonth": 1, "StartDay": 1, "EndMonth": 5, "EndDay": 31},
                    {"WeekSchedule": "Warm Week", "StartMonth": 6, "StartDay": 1, "EndMonth": 9, "EndDay": 30},
                    {"WeekSchedule": "Cold Week", "StartMonth": 10, "StartDay": 1, "EndMonth": 12, "EndDay": 31}
                ]
            }]
        }))
        .unwrap();
        let sref = registry.schedule_ref("Setpoint").unwrap();
        // June 15 falls in the warm period (slot 167 leap-aware)
        assert_eq!(
            registry.lookup(sref, 167, DayType::Wednesday, 12, 1).unwrap(),
            25.0
        );
        assert_eq!(
            registry.lookup(sref, 20, DayType::Wednesday, 12, 1).unwrap(),
            15.0
        );
        // holiday slot resolves through the week's holiday column
        assert_eq!(
            registry.lookup(sref, 20, DayType::Holiday, 1, 1).unwrap(),
            15.0
        );
    }

    #[rstest]
    fn overlapping_year_periods_are_fatal() {
        let result = compile_json(json!({
            "Simulation": {"TimestepsPerHour": 1},
            "Schedule:Day:Hourly": [
                {"Name": "Day", "HourlyValues": vec![1.0; 24]}
            ],
            "Schedule:Week:Daily": [{
                "Name": "Week",
                "Sunday": "Day", "Monday": "Day", "Tuesday": "Day",
                "Wednesday": "Day", "Thursday": "Day", "Friday": "Day",
                "Saturday": "Day", "Holiday": "Day",
                "SummerDesignDay": "Day", "WinterDesignDay": "Day",
                "CustomDay1": "Day", "CustomDay2": "Day"
            }],
            "Schedule:Year": [{
                "Name": "Overlap",
                "Periods": [
                    {"WeekSchedule": "Week", "StartMonth": 1, "StartDay": 1, "EndMonth": 12, "EndDay": 31},
                    {"WeekSchedule": "Week", "StartMonth": 6, "StartDay": 1, "EndMonth": 6, "EndDay": 30}
                ]
            }]
        }));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("covered by more than one period"));
    }

    #[rstest]
    fn constant_schedule_broadcasts_everywhere() {
        let registry = compile_json(json!({
            "Schedule:Constant": [{"Name": "Always Half", "HourlyValue": 0.5}]
        }))
        .unwrap();
        let sref = registry.schedule_ref("Always Half").unwrap();
        assert_eq!(registry.lookup(sref, 1, DayType::Sunday, 1, 1).unwrap(), 0.5);
        assert_eq!(
            registry.lookup(sref, 366, DayType::Holiday, 24, 4).unwrap(),
            0.5
        );
        assert_eq!(registry.annual_min_max(sref).unwrap(), (0.5, 0.5));
    }

    #[rstest]
    fn external_schedule_takes_pushed_values() {
        let mut registry = compile_json(json!({
            "ExternalInterface:Schedule": [{"Name": "Live Signal", "InitialValue": 0.2}]
        }))
        .unwrap();
        let sref = registry.schedule_ref("Live Signal").unwrap();
        let mut clock = SimulationClock::new(4, 2017).unwrap();
        clock.start_day(1, DayType::Sunday).unwrap();
        registry.update_all(&clock).unwrap();
        assert_eq!(registry.current_value(sref), 0.2);
        registry.set_external_value(sref, 0.9).unwrap();
        assert_eq!(registry.current_value(sref), 0.9);
        // pushed value survives the next tick refresh, no recompilation
        registry.update_all(&clock).unwrap();
        assert_eq!(registry.current_value(sref), 0.9);
    }

    #[rstest]
    fn non_external_schedule_rejects_pushed_values() {
        let mut registry = compile_json(json!({
            "Schedule:Constant": [{"Name": "Fixed", "HourlyValue": 1.0}]
        }))
        .unwrap();
        let sref = registry.schedule_ref("Fixed").unwrap();
        assert!(registry.set_external_value(sref, 2.0).is_err());
    }

    #[rstest]
    fn pseudo_schedules_answer_without_compilation() {
        let registry = compile_json(json!({})).unwrap();
        assert_eq!(
            registry
                .lookup(ScheduleRef::AlwaysOn, 100, DayType::Friday, 7, 1)
                .unwrap(),
            1.0
        );
        assert_eq!(
            registry
                .lookup(ScheduleRef::AlwaysOff, 100, DayType::Friday, 7, 1)
                .unwrap(),
            0.0
        );
        assert_eq!(registry.current_value(ScheduleRef::AlwaysOn), 1.0);
    }

    #[rstest]
    fn file_schedule_imports_a_column() {
        // 8760 rows, column 2 carries hour-of-day, comma separated
        let mut contents = String::from("stamp,value\n");
        for day in 0..365 {
            for hour in 0..24 {
                contents.push_str(&format!("{day},{hour}.0\n"));
            }
        }
        let loader = MapFileLoader::default().with_file("profile.csv", contents);
        let registry = compile_json_with_loader(
            json!({
                "Simulation": {"TimestepsPerHour": 1},
                "Schedule:File": [{
                    "Name": "Imported",
                    "FileName": "profile.csv",
                    "ColumnNumber": 2,
                    "RowsToSkip": 1,
                    "NumberOfHours": 8760
                }]
            }),
            loader,
        )
        .unwrap();
        let sref = registry.schedule_ref("Imported").unwrap();
        assert_eq!(registry.lookup(sref, 1, DayType::Sunday, 1, 1).unwrap(), 0.0);
        assert_eq!(
            registry.lookup(sref, 1, DayType::Sunday, 24, 1).unwrap(),
            23.0
        );
        // March 1 sits at slot 61; the file's day 60 maps there in a 365-day file
        assert_eq!(
            registry.lookup(sref, 61, DayType::Monday, 12, 1).unwrap(),
            11.0
        );
        // Feb 29 inherits Feb 28
        assert_eq!(
            registry.lookup(sref, 60, DayType::Monday, 12, 1).unwrap(),
            11.0
        );
    }

    #[rstest]
    fn shading_file_pivots_one_schedule_per_column() {
        let mut contents = String::from("stamp,South Wall,West Wall\n");
        for _ in 0..8760 {
            contents.push_str("x,0.25,0.75\n");
        }
        let loader = MapFileLoader::default().with_file("shading.csv", contents);
        let registry = compile_json_with_loader(
            json!({
                "Simulation": {"TimestepsPerHour": 1},
                "Schedule:File:Shading": [{"FileName": "shading.csv"}]
            }),
            loader,
        )
        .unwrap();
        let south = registry.schedule_ref("South Wall").unwrap();
        let west = registry.schedule_ref("West Wall").unwrap();
        assert_eq!(
            registry.lookup(south, 180, DayType::Tuesday, 12, 1).unwrap(),
            0.25
        );
        assert_eq!(
            registry.lookup(west, 180, DayType::Tuesday, 12, 1).unwrap(),
            0.75
        );
    }

    #[rstest]
    fn schedule_details_report_lists_compiled_tables(office_compact: serde_json::Value) {
        let mut registry = compile_json(office_compact).unwrap();
        let sref = registry.schedule_ref("Office Occupancy").unwrap();
        registry.mark_used(sref);
        let mut buffer = vec![];
        registry
            .report_details(&mut buffer, ScheduleReportLevel::Hourly)
            .unwrap();
        let report = String::from_utf8(buffer).unwrap();
        assert!(report.contains("Schedule,Office Occupancy"));
        assert!(report.contains("DaySchedule,Office Occupancy Day 1"));
        assert!(report.contains(",Yes"));
    }
}
