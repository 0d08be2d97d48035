//! Compiler for the compact schedule DSL: repeated `Through:<date>` /
//! `For:<day types>` / `Until:<time>,<value>` runs covering a whole year.

use super::day::{compile_interval_day, DaySchedule};
use super::{AnnualSchedule, ScheduleRegistry, WeekSchedule};
use crate::core::units::{DAY_TYPE_COUNT, MAX_DAYS_PER_YEAR};
use crate::errors::ErrorCollector;
use crate::input::{CompactScheduleInput, InterpolationInput, UntilEntry};
use crate::simulation_time::{calendar_slot, DayType, ALL_DAY_TYPES, FEB29_SLOT};
use anyhow::{anyhow, bail};

/// Day types selected by one "For:" field. `all_other_days` marks the group
/// that soaks up every slot left unassigned in its week.
#[derive(Debug, Default)]
pub(crate) struct DayTypeSelection {
    pub types: Vec<DayType>,
    pub all_other_days: bool,
}

/// Parse a "For:" day-type list such as "Weekdays SummerDesignDay" or
/// "AllOtherDays". Group words expand to their members.
pub(crate) fn parse_day_type_list(list: &str) -> anyhow::Result<DayTypeSelection> {
    let mut selection = DayTypeSelection::default();
    for token in list.split([' ', ',']).filter(|t| !t.is_empty()) {
        match token.to_ascii_lowercase().as_str() {
            "weekdays" | "weekday" => selection.types.extend([
                DayType::Monday,
                DayType::Tuesday,
                DayType::Wednesday,
                DayType::Thursday,
                DayType::Friday,
            ]),
            "weekends" | "weekend" => selection
                .types
                .extend([DayType::Saturday, DayType::Sunday]),
            "alldays" => selection.types.extend(ALL_DAY_TYPES),
            "allotherdays" => selection.all_other_days = true,
            "holidays" => selection.types.push(DayType::Holiday),
            _ => selection.types.push(token.parse::<DayType>()?),
        }
    }
    if selection.types.is_empty() && !selection.all_other_days {
        bail!("'{list}' selects no day types");
    }
    Ok(selection)
}

/// Parse a "Through:" date of the form "M/D".
pub(crate) fn parse_through_date(date: &str) -> anyhow::Result<(u32, u32)> {
    let cleaned = date.trim();
    let (month, day) = cleaned
        .split_once('/')
        .ok_or_else(|| anyhow!("Malformed date '{cleaned}', expected month/day"))?;
    let month: u32 = month
        .trim()
        .parse()
        .map_err(|_| anyhow!("Malformed month in date '{cleaned}'"))?;
    let day: u32 = day
        .trim()
        .parse()
        .map_err(|_| anyhow!("Malformed day in date '{cleaned}'"))?;
    calendar_slot(month, day)?;
    Ok((month, day))
}

fn field_payload<'a>(field: &'a str, keyword: &str) -> Option<&'a str> {
    let trimmed = field.trim();
    if trimmed.len() >= keyword.len() && trimmed[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(trimmed[keyword.len()..].trim_start_matches(':').trim())
    } else {
        None
    }
}

fn parse_interpolate_mode(payload: &str) -> anyhow::Result<InterpolationInput> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "no" => Ok(InterpolationInput::No),
        "yes" | "average" => Ok(InterpolationInput::Average),
        "linear" => Ok(InterpolationInput::Linear),
        other => bail!("Unknown interpolation mode '{other}'"),
    }
}

struct ForGroup {
    selection: DayTypeSelection,
    interpolation: InterpolationInput,
    entries: Vec<UntilEntry>,
}

struct ThroughBlock {
    end_month: u32,
    end_day: u32,
    groups: Vec<ForGroup>,
}

/// Split the raw field stream into Through blocks of For groups. Fatal
/// parse problems accumulate; a `None` return means the object was unusable.
fn parse_blocks(
    fields: &[String],
    context: &str,
    collector: &mut ErrorCollector,
) -> Option<Vec<ThroughBlock>> {
    let mut blocks: Vec<ThroughBlock> = vec![];
    let mut unusable = false;
    let mut iter = fields.iter().peekable();
    while let Some(field) = iter.next() {
        if let Some(payload) = field_payload(field, "Through") {
            match parse_through_date(payload) {
                Ok((end_month, end_day)) => blocks.push(ThroughBlock {
                    end_month,
                    end_day,
                    groups: vec![],
                }),
                Err(err) => {
                    collector.severe(context, err);
                    unusable = true;
                }
            }
        } else if let Some(payload) = field_payload(field, "For") {
            let Some(block) = blocks.last_mut() else {
                collector.severe(context, "'For:' field encountered before any 'Through:'");
                unusable = true;
                continue;
            };
            match parse_day_type_list(payload) {
                Ok(selection) => block.groups.push(ForGroup {
                    selection,
                    interpolation: InterpolationInput::No,
                    entries: vec![],
                }),
                Err(err) => {
                    collector.severe(context, err);
                    unusable = true;
                }
            }
        } else if let Some(payload) = field_payload(field, "Interpolate") {
            let Some(group) = blocks.last_mut().and_then(|b| b.groups.last_mut()) else {
                collector.severe(context, "'Interpolate:' field encountered before any 'For:'");
                unusable = true;
                continue;
            };
            match parse_interpolate_mode(payload) {
                Ok(mode) => group.interpolation = mode,
                Err(err) => {
                    collector.severe(context, err);
                    unusable = true;
                }
            }
        } else if let Some(payload) = field_payload(field, "Until") {
            let Some(group) = blocks.last_mut().and_then(|b| b.groups.last_mut()) else {
                collector.severe(context, "'Until:' field encountered before any 'For:'");
                unusable = true;
                continue;
            };
            let Some(value_field) = iter.next() else {
                collector.severe(context, format!("'Until: {payload}' has no following value field"));
                unusable = true;
                continue;
            };
            match value_field.trim().parse::<f64>() {
                Ok(value) => group.entries.push(UntilEntry {
                    until: payload.to_string(),
                    value,
                }),
                Err(_) => {
                    collector.severe(
                        context,
                        format!("Value field '{value_field}' following 'Until: {payload}' is not numeric"),
                    );
                    unusable = true;
                }
            }
        } else {
            collector.severe(context, format!("Unrecognised field '{field}'"));
            unusable = true;
        }
    }
    if unusable || blocks.is_empty() {
        if blocks.is_empty() && !unusable {
            collector.severe(context, "No 'Through:' fields present");
        }
        return None;
    }
    Some(blocks)
}

/// Compile one `Schedule:Compact` object into day/week/annual entries on the
/// registry.
pub(crate) fn compile_compact(
    registry: &mut ScheduleRegistry,
    input: &CompactScheduleInput,
    collector: &mut ErrorCollector,
) {
    let context = format!("Schedule:Compact={}", input.name);
    let type_limits = registry.resolve_type_limits(input.schedule_type_limits.as_deref(), &context, collector);
    let Some(blocks) = parse_blocks(&input.fields, &context, collector) else {
        return;
    };
    let steps_per_hour = registry.steps_per_hour();

    let mut week_for_slot: Vec<Option<usize>> = vec![None; MAX_DAYS_PER_YEAR as usize];
    let mut previous_end_slot = 0u32;
    let mut day_counter = 0usize;
    let mut week_counter = 0usize;

    for block in &blocks {
        let end_slot = match calendar_slot(block.end_month, block.end_day) {
            Ok(slot) => slot,
            Err(err) => {
                collector.severe(&context, err);
                continue;
            }
        };
        if end_slot <= previous_end_slot {
            collector.severe(
                &context,
                format!(
                    "'Through: {}/{}' overlaps days already covered by an earlier range",
                    block.end_month, block.end_day
                ),
            );
            continue;
        }

        // build this range's week from its For groups
        let mut slots: [Option<usize>; DAY_TYPE_COUNT] = [None; DAY_TYPE_COUNT];
        let mut other_days_schedule: Option<usize> = None;
        for group in &block.groups {
            day_counter += 1;
            let day_name = format!("{} Day {day_counter}", input.name);
            let Some(day) = compile_interval_day(
                &day_name,
                type_limits,
                group.interpolation,
                &group.entries,
                steps_per_hour,
                &context,
                collector,
            ) else {
                continue;
            };
            registry.check_day_against_limits(&day, collector);
            let Some(day_idx) = registry.add_day_schedule(day, &context, collector) else {
                continue;
            };
            for day_type in &group.selection.types {
                let slot = day_type.slot();
                if slots[slot].is_some() {
                    collector.severe(
                        &context,
                        format!("Day type {day_type} assigned twice within one week definition"),
                    );
                } else {
                    slots[slot] = Some(day_idx);
                }
            }
            if group.selection.all_other_days {
                other_days_schedule = Some(day_idx);
            }
        }

        // unassigned day types take AllOtherDays when given, else default 0.0
        let unassigned: Vec<DayType> = ALL_DAY_TYPES
            .iter()
            .filter(|dt| slots[dt.slot()].is_none())
            .copied()
            .collect();
        if !unassigned.is_empty() {
            let fill = match other_days_schedule {
                Some(idx) => idx,
                None => {
                    collector.warning(
                        &context,
                        format!(
                            "Day types [{}] not covered by any 'For:' field, defaulting to 0.0",
                            unassigned
                                .iter()
                                .map(|dt| dt.label())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    );
                    day_counter += 1;
                    let zero = DaySchedule::constant(
                        format!("{} Day {day_counter}", input.name),
                        type_limits,
                        0.0,
                        steps_per_hour,
                    );
                    match registry.add_day_schedule(zero, &context, collector) {
                        Some(idx) => idx,
                        None => continue,
                    }
                }
            };
            for day_type in unassigned {
                slots[day_type.slot()] = Some(fill);
            }
        }

        week_counter += 1;
        let week = WeekSchedule {
            name: format!("{} Week {week_counter}", input.name),
            days: slots,
        };
        let Some(week_idx) = registry.add_week_schedule(week, &context, collector) else {
            continue;
        };
        for slot in previous_end_slot + 1..=end_slot {
            let entry = &mut week_for_slot[(slot - 1) as usize];
            if entry.is_some() {
                collector.severe(
                    &context,
                    format!("Day {slot} of the year is covered by more than one 'Through:' range"),
                );
            } else {
                *entry = Some(week_idx);
            }
        }
        previous_end_slot = end_slot;
    }

    // Feb 29 inherits Feb 28's week if unset; every other day must be covered.
    finalize_year_coverage(&mut week_for_slot, &context, collector);

    registry.add_annual(
        AnnualSchedule {
            name: input.name.clone(),
            type_limits,
            weeks: week_for_slot,
        },
        &context,
        collector,
    );
}

/// Coverage invariant for a 366-slot week map: gaps are fatal, except Feb 29
/// which copies Feb 28's assignment when left unset.
pub(crate) fn finalize_year_coverage(
    week_for_slot: &mut [Option<usize>],
    context: &str,
    collector: &mut ErrorCollector,
) {
    let feb29 = (FEB29_SLOT - 1) as usize;
    if week_for_slot[feb29].is_none() {
        week_for_slot[feb29] = week_for_slot[feb29 - 1];
    }
    let gaps: Vec<u32> = week_for_slot
        .iter()
        .enumerate()
        .filter_map(|(i, w)| w.is_none().then_some(i as u32 + 1))
        .collect();
    if !gaps.is_empty() {
        collector.severe(
            context,
            format!(
                "{} day(s) of the year have no week assigned (first missing day {})",
                gaps.len(),
                gaps[0]
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::*;

    #[rstest]
    fn day_type_groups_expand() {
        let selection = parse_day_type_list("Weekdays SummerDesignDay").unwrap();
        assert_eq!(selection.types.len(), 6);
        assert!(selection.types.contains(&DayType::Monday));
        assert!(selection.types.contains(&DayType::SummerDesignDay));
        assert!(!selection.all_other_days);

        let other = parse_day_type_list("AllOtherDays").unwrap();
        assert!(other.types.is_empty());
        assert!(other.all_other_days);
    }

    #[rstest]
    fn unknown_day_type_errors() {
        assert!(parse_day_type_list("Weekdays Frydays").is_err());
        assert!(parse_day_type_list("").is_err());
    }

    #[rstest]
    fn through_dates_parse() {
        assert_eq!(parse_through_date("12/31").unwrap(), (12, 31));
        assert_eq!(parse_through_date(" 2/29 ").unwrap(), (2, 29));
        assert!(parse_through_date("13/1").is_err());
        assert!(parse_through_date("December 31").is_err());
    }

    #[rstest]
    fn feb29_inherits_feb28() {
        let mut weeks = vec![Some(7usize); 366];
        weeks[(FEB29_SLOT - 1) as usize] = None;
        weeks[(FEB29_SLOT - 2) as usize] = Some(3);
        let mut collector = ErrorCollector::new();
        finalize_year_coverage(&mut weeks, "test", &mut collector);
        assert!(!collector.has_fatals());
        assert_eq!(weeks[(FEB29_SLOT - 1) as usize], Some(3));
    }

    #[rstest]
    fn uncovered_days_are_fatal() {
        let mut weeks = vec![Some(1usize); 366];
        weeks[100] = None;
        weeks[101] = None;
        let mut collector = ErrorCollector::new();
        finalize_year_coverage(&mut weeks, "test", &mut collector);
        assert!(collector.has_fatals());
    }
}
