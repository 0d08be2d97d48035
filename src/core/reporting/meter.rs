//! The meter engine: the resource/end-use/zone meter hierarchy, custom and
//! decrement meter topology, and the per-tick fan-out from variables into
//! nested time-window accumulators.

use super::emission::{EmissionLayer, EmitStream};
use super::sinks::SqlSink;
use super::variable::VariableRegistry;
use super::{MinMaxTracker, ReportIdGenerator};
use crate::core::units::{ReportingFrequency, StoreType, Unit};
use crate::core::units::VariableKind;
use crate::errors::ErrorCollector;
use crate::input::{
    CustomDecrementMeterInput, CustomMeterInput, EndUseCategory, Input, MeterGroup, ResourceType,
};
use crate::simulation_time::SimulationClock;
use anyhow::{anyhow, bail};
use indexmap::IndexMap;
use smartstring::alias::String as SmartString;
use std::io::Write;
use tracing::warn;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeterKind {
    Normal,
    Custom,
    CustomDecrement,
    /// Reserved: follows the decrement update path but is reported
    /// distinctly.
    CustomDifference,
}

/// One nested reporting window of a meter: accumulator, min/max-with-date of
/// the folded finer-window totals, and the ids its rows are emitted under.
#[derive(Debug)]
pub struct MeterWindow {
    pub value: f64,
    pub min_max: MinMaxTracker,
    pub report_id: usize,
    pub cumulative_report_id: usize,
    pub report: bool,
    pub report_cumulative: bool,
}

impl MeterWindow {
    fn new(ids: &mut ReportIdGenerator) -> Self {
        Self {
            value: 0.0,
            min_max: MinMaxTracker::default(),
            report_id: ids.next_id(),
            cumulative_report_id: ids.next_id(),
            report: false,
            report_cumulative: false,
        }
    }

    /// Add the just-closed finer window's total and track it as a min/max
    /// candidate.
    fn fold(&mut self, amount: f64, stamp: u32) {
        self.value += amount;
        self.min_max.observe(amount, stamp);
    }

    fn reset(&mut self) {
        self.value = 0.0;
        self.min_max.reset();
    }
}

#[derive(Debug)]
pub struct Meter {
    pub name: String,
    pub kind: MeterKind,
    pub units: Unit,
    pub resource: ResourceType,
    pub end_use: Option<EndUseCategory>,
    pub end_use_sub: Option<String>,
    pub group: Option<MeterGroup>,
    pub zone: Option<String>,
    /// Decrement/difference meters subtract their attachments from this
    /// meter's timestep total.
    pub source_meter: Option<usize>,
    /// Variable sources contributing to this meter, for membership tests and
    /// the meter-detail report.
    contributions: Vec<usize>,
    ts_value: f64,
    ts: MeterWindow,
    hr: MeterWindow,
    dy: MeterWindow,
    mn: MeterWindow,
    yr: MeterWindow,
    sm: MeterWindow,
    final_year_sm_value: f64,
    final_year_sm_min_max: MinMaxTracker,
    /// Running total since the start of the (post-warmup) run, printed by
    /// cumulative report rows.
    running_total: f64,
}

impl Meter {
    pub fn ts_value(&self) -> f64 {
        self.ts_value
    }

    pub fn window(&self, window: ReportingFrequency) -> &MeterWindow {
        match window {
            ReportingFrequency::EachCall | ReportingFrequency::TimeStep => &self.ts,
            ReportingFrequency::Hourly => &self.hr,
            ReportingFrequency::Daily => &self.dy,
            ReportingFrequency::Monthly => &self.mn,
            ReportingFrequency::Yearly => &self.yr,
            ReportingFrequency::RunPeriod => &self.sm,
        }
    }

    fn window_mut(&mut self, window: ReportingFrequency) -> &mut MeterWindow {
        match window {
            ReportingFrequency::EachCall | ReportingFrequency::TimeStep => &mut self.ts,
            ReportingFrequency::Hourly => &mut self.hr,
            ReportingFrequency::Daily => &mut self.dy,
            ReportingFrequency::Monthly => &mut self.mn,
            ReportingFrequency::Yearly => &mut self.yr,
            ReportingFrequency::RunPeriod => &mut self.sm,
        }
    }

    pub fn final_year_total(&self) -> f64 {
        self.final_year_sm_value
    }

    pub fn contributes(&self, variable_id: usize) -> bool {
        self.contributions.contains(&variable_id)
    }
}

/// The many-to-many join: per report variable, the ordered standard and
/// custom meters it feeds.
#[derive(Debug, Default)]
pub struct VarMeterArray {
    pub source_var: usize,
    pub standard: Vec<usize>,
    pub custom: Vec<usize>,
}

/// Resource/end-use metadata a producer supplies when a summed variable
/// should be metered.
#[derive(Clone, Debug)]
pub struct MeterSpec {
    pub resource: ResourceType,
    pub end_use: EndUseCategory,
    pub end_use_sub: Option<String>,
    pub group: Option<MeterGroup>,
    pub zone: Option<String>,
}

#[derive(Debug, Default)]
pub struct MeterEngine {
    meters: Vec<Meter>,
    by_name: IndexMap<SmartString, usize>,
    var_meter_arrays: Vec<VarMeterArray>,
}

fn name_key(name: &str) -> SmartString {
    name.trim().to_uppercase().into()
}

impl MeterEngine {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn meter_count(&self) -> usize {
        self.meters.len()
    }

    pub fn meter_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(&name_key(name)).copied()
    }

    pub fn meter(&self, idx: usize) -> Option<&Meter> {
        self.meters.get(idx)
    }

    pub fn meter_by_name(&self, name: &str) -> Option<&Meter> {
        self.meter_index(name).and_then(|idx| self.meters.get(idx))
    }

    /// Create a meter. Duplicate names are fatal.
    #[allow(clippy::too_many_arguments)]
    pub fn add_meter(
        &mut self,
        name: &str,
        units: Unit,
        kind: MeterKind,
        resource: ResourceType,
        end_use: Option<EndUseCategory>,
        end_use_sub: Option<String>,
        group: Option<MeterGroup>,
        zone: Option<String>,
        ids: &mut ReportIdGenerator,
    ) -> anyhow::Result<usize> {
        let key = name_key(name);
        if self.by_name.contains_key(&key) {
            bail!("Requested to Add Meter which was already present={name}");
        }
        let idx = self.meters.len();
        self.by_name.insert(key, idx);
        self.meters.push(Meter {
            name: name.to_string(),
            kind,
            units,
            resource,
            end_use,
            end_use_sub,
            group,
            zone,
            source_meter: None,
            contributions: vec![],
            ts_value: 0.0,
            ts: MeterWindow::new(ids),
            hr: MeterWindow::new(ids),
            dy: MeterWindow::new(ids),
            mn: MeterWindow::new(ids),
            yr: MeterWindow::new(ids),
            sm: MeterWindow::new(ids),
            final_year_sm_value: 0.0,
            final_year_sm_min_max: MinMaxTracker::default(),
            running_total: 0.0,
        });
        Ok(idx)
    }

    fn ensure_meter(
        &mut self,
        name: &str,
        units: Unit,
        resource: &ResourceType,
        end_use: Option<&EndUseCategory>,
        end_use_sub: Option<&str>,
        group: Option<&MeterGroup>,
        zone: Option<&str>,
        ids: &mut ReportIdGenerator,
    ) -> anyhow::Result<usize> {
        if let Some(idx) = self.meter_index(name) {
            if self.meters[idx].units != units {
                warn!(
                    "Meter '{name}' carries units {} but a new attachment uses {units}",
                    self.meters[idx].units
                );
            }
            return Ok(idx);
        }
        self.add_meter(
            name,
            units,
            MeterKind::Normal,
            resource.clone(),
            end_use.cloned(),
            end_use_sub.map(str::to_string),
            group.cloned(),
            zone.map(str::to_string),
            ids,
        )
    }

    fn var_array_for(
        &mut self,
        variables: &mut VariableRegistry,
        variable_id: usize,
    ) -> anyhow::Result<usize> {
        let source = variables
            .source(variable_id)
            .ok_or_else(|| anyhow!("Variable index {variable_id} is out of the declared range"))?;
        if let Some(idx) = source.meter_array {
            return Ok(idx);
        }
        let idx = self.var_meter_arrays.len();
        self.var_meter_arrays.push(VarMeterArray {
            source_var: variable_id,
            ..Default::default()
        });
        variables
            .source_mut(variable_id)
            .expect("source existence checked above")
            .meter_array = Some(idx);
        Ok(idx)
    }

    /// Validate the free-text vocabulary and lazily create every implied
    /// standard meter for a variable, recording its contribution into each.
    pub fn attach_standard_meters(
        &mut self,
        spec: &MeterSpec,
        variable_id: usize,
        variables: &mut VariableRegistry,
        ids: &mut ReportIdGenerator,
    ) -> anyhow::Result<usize> {
        if let ResourceType::Other(raw) = &spec.resource {
            bail!("Illegal ResourceType Entered={raw}");
        }
        if let EndUseCategory::Other(raw) = &spec.end_use {
            bail!("Illegal EndUse Entered={raw}");
        }
        if let Some(MeterGroup::Other(raw)) = &spec.group {
            bail!("Illegal Group Entered={raw}");
        }
        let source = variables
            .source(variable_id)
            .ok_or_else(|| anyhow!("Variable index {variable_id} is out of the declared range"))?;
        if source.store_type != StoreType::Summed {
            bail!(
                "Variable '{}:{}' is Averaged and cannot be placed on a meter",
                source.key,
                source.name
            );
        }
        let units = source.units;

        let mut implied: Vec<String> = vec![format!("{}:Facility", spec.resource)];
        if let Some(group) = &spec.group {
            implied.push(format!("{}:{group}", spec.resource));
        }
        if let Some(zone) = &spec.zone {
            implied.push(format!("{}:Zone:{zone}", spec.resource));
        }
        implied.push(format!("{}:{}", spec.end_use, spec.resource));
        if let Some(zone) = &spec.zone {
            implied.push(format!("{}:{}:Zone:{zone}", spec.end_use, spec.resource));
        }
        if let Some(sub) = &spec.end_use_sub {
            implied.push(format!("{sub}:{}:{}", spec.end_use, spec.resource));
        }

        let array_idx = self.var_array_for(variables, variable_id)?;
        for name in implied {
            let meter_idx = self.ensure_meter(
                &name,
                units,
                &spec.resource,
                Some(&spec.end_use),
                spec.end_use_sub.as_deref(),
                spec.group.as_ref(),
                spec.zone.as_deref(),
                ids,
            )?;
            if !self.var_meter_arrays[array_idx].standard.contains(&meter_idx) {
                self.var_meter_arrays[array_idx].standard.push(meter_idx);
                self.meters[meter_idx].contributions.push(variable_id);
            }
        }
        Ok(array_idx)
    }

    /// Append a custom meter to a variable's fan-out list (growable,
    /// unbounded).
    pub fn attach_custom_meter(
        &mut self,
        variable_id: usize,
        meter_idx: usize,
        variables: &mut VariableRegistry,
    ) -> anyhow::Result<()> {
        if meter_idx >= self.meters.len() {
            bail!("Meter index {meter_idx} is out of the declared range");
        }
        let array_idx = self.var_array_for(variables, variable_id)?;
        if !self.var_meter_arrays[array_idx].custom.contains(&meter_idx) {
            self.var_meter_arrays[array_idx].custom.push(meter_idx);
            self.meters[meter_idx].contributions.push(variable_id);
        }
        Ok(())
    }

    /// No cycles through source-meter edges; generalises the "no custom
    /// meter on a custom meter" rule if deeper nesting is ever introduced.
    fn assert_acyclic_source_chain(&self, start: usize) -> anyhow::Result<()> {
        let mut seen = vec![start];
        let mut current = start;
        while let Some(next) = self.meters[current].source_meter {
            if seen.contains(&next) {
                bail!(
                    "Meter '{}' participates in a source-meter cycle",
                    self.meters[start].name
                );
            }
            seen.push(next);
            current = next;
        }
        Ok(())
    }

    /// Resolve Meter:Custom and Meter:CustomDecrement topology. All
    /// diagnostics for the pass accumulate on the collector.
    pub fn setup_custom_meters(
        &mut self,
        input: &Input,
        variables: &mut VariableRegistry,
        ids: &mut ReportIdGenerator,
        collector: &mut ErrorCollector,
    ) {
        for custom in &input.custom_meters {
            self.setup_one_custom_meter(custom, variables, ids, collector);
        }
        for decrement in &input.custom_decrement_meters {
            self.setup_one_decrement_meter(decrement, variables, ids, collector);
        }
    }

    fn setup_one_custom_meter(
        &mut self,
        custom: &CustomMeterInput,
        variables: &mut VariableRegistry,
        ids: &mut ReportIdGenerator,
        collector: &mut ErrorCollector,
    ) {
        let context = format!("Meter:Custom={}", custom.name);
        if let ResourceType::Other(raw) = &custom.fuel_type {
            collector.severe(&context, format!("Illegal ResourceType Entered={raw}"));
            return;
        }
        let mut resolved: Vec<usize> = vec![];
        let mut units: Option<Unit> = None;
        for entry in &custom.entries {
            let entry_sources = self.gather_entry_sources(
                &entry.output_variable_or_meter_name,
                entry.key_name.as_deref(),
                variables,
                &context,
                collector,
            );
            let Some(sources) = entry_sources else {
                continue;
            };
            for source_idx in sources {
                let source = variables.source(source_idx).expect("resolved index is valid");
                if source.store_type != StoreType::Summed {
                    collector.severe(
                        &context,
                        format!(
                            "Referenced variable '{}:{}' is Averaged; only Summed sources may be metered",
                            source.key, source.name
                        ),
                    );
                    continue;
                }
                let source_units = source.units;
                match units {
                    None => units = Some(source_units),
                    Some(existing) if existing != source_units => {
                        collector.warning(
                            &context,
                            format!(
                                "Referenced source '{}' carries units {source_units}, expected {existing}; entry skipped",
                                source.name
                            ),
                        );
                        continue;
                    }
                    _ => {}
                }
                if !resolved.contains(&source_idx) {
                    resolved.push(source_idx);
                }
            }
        }

        let meter_idx = match self.add_meter(
            &custom.name,
            units.unwrap_or(Unit::J),
            MeterKind::Custom,
            custom.fuel_type.clone(),
            None,
            None,
            None,
            None,
            ids,
        ) {
            Ok(idx) => idx,
            Err(err) => {
                collector.severe(&context, err);
                return;
            }
        };
        if resolved.is_empty() {
            collector.warning(&context, "No variables attached; the meter will report zero");
        }
        for source_idx in resolved {
            if let Err(err) = self.attach_custom_meter(source_idx, meter_idx, variables) {
                collector.severe(&context, err);
            }
        }
    }

    fn setup_one_decrement_meter(
        &mut self,
        decrement: &CustomDecrementMeterInput,
        variables: &mut VariableRegistry,
        ids: &mut ReportIdGenerator,
        collector: &mut ErrorCollector,
    ) {
        let context = format!("Meter:CustomDecrement={}", decrement.name);
        if let ResourceType::Other(raw) = &decrement.fuel_type {
            collector.severe(&context, format!("Illegal ResourceType Entered={raw}"));
            return;
        }
        let Some(source_meter_idx) = self.meter_index(&decrement.source_meter_name) else {
            collector.severe(
                &context,
                format!("Source meter '{}' was not found", decrement.source_meter_name),
            );
            return;
        };
        if matches!(
            self.meters[source_meter_idx].kind,
            MeterKind::CustomDecrement | MeterKind::CustomDifference
        ) {
            collector.severe(
                &context,
                format!(
                    "Source meter '{}' is itself a decrement meter",
                    decrement.source_meter_name
                ),
            );
            return;
        }

        let mut resolved: Vec<usize> = vec![];
        for entry in &decrement.entries {
            let entry_sources = self.gather_entry_sources(
                &entry.output_variable_or_meter_name,
                entry.key_name.as_deref(),
                variables,
                &context,
                collector,
            );
            let Some(sources) = entry_sources else {
                continue;
            };
            for source_idx in sources {
                // every decremented variable must already be reachable from
                // the named source meter
                if !self.meters[source_meter_idx].contributes(source_idx) {
                    let source = variables.source(source_idx).expect("resolved index is valid");
                    collector.severe(
                        &context,
                        format!(
                            "Variable '{}:{}' is not found on source meter '{}'",
                            source.key, source.name, decrement.source_meter_name
                        ),
                    );
                    continue;
                }
                if !resolved.contains(&source_idx) {
                    resolved.push(source_idx);
                }
            }
        }

        let units = self.meters[source_meter_idx].units;
        let meter_idx = match self.add_meter(
            &decrement.name,
            units,
            MeterKind::CustomDecrement,
            decrement.fuel_type.clone(),
            None,
            None,
            None,
            None,
            ids,
        ) {
            Ok(idx) => idx,
            Err(err) => {
                collector.severe(&context, err);
                return;
            }
        };
        self.meters[meter_idx].source_meter = Some(source_meter_idx);
        if let Err(err) = self.assert_acyclic_source_chain(meter_idx) {
            collector.severe(&context, err);
            self.meters[meter_idx].source_meter = None;
            return;
        }
        if resolved.is_empty() {
            collector.warning(&context, "No variables attached; the meter will mirror its source");
        }
        for source_idx in resolved {
            if let Err(err) = self.attach_custom_meter(source_idx, meter_idx, variables) {
                collector.severe(&context, err);
            }
        }
    }

    /// Resolve one custom-meter entry to variable sources: a variable name
    /// (optionally keyed), or the contribution set of a referenced
    /// non-custom meter.
    fn gather_entry_sources(
        &self,
        entry_name: &str,
        key: Option<&str>,
        variables: &VariableRegistry,
        context: &str,
        collector: &mut ErrorCollector,
    ) -> Option<Vec<usize>> {
        if let Some(meter_idx) = self.meter_index(entry_name) {
            let meter = &self.meters[meter_idx];
            if matches!(
                meter.kind,
                MeterKind::Custom | MeterKind::CustomDecrement | MeterKind::CustomDifference
            ) {
                collector.severe(
                    context,
                    format!("Referencing custom meter '{entry_name}' is not allowed"),
                );
                return None;
            }
            return Some(meter.contributions.clone());
        }
        let found = variables.find_sources_by_name(entry_name, key);
        if found.is_empty() {
            collector.warning(
                context,
                format!("'{entry_name}' matches no output variable or meter; entry ignored"),
            );
            return None;
        }
        Some(found)
    }

    /// Apply `Output:Meter` / `Output:Meter:Cumulative` requests, flagging
    /// the requested window on each named meter.
    pub fn apply_meter_requests(&mut self, input: &Input, collector: &mut ErrorCollector) {
        let requests = input
            .output_meters
            .iter()
            .map(|r| (r, false))
            .chain(input.output_meters_cumulative.iter().map(|r| (r, true)));
        for (request, cumulative) in requests {
            let object = if cumulative {
                "Output:Meter:Cumulative"
            } else {
                "Output:Meter"
            };
            let context = format!("{object}={}", request.key_name);
            let Some(meter_idx) = self.meter_index(&request.key_name) else {
                collector.warning(&context, "Meter name not found; request ignored");
                continue;
            };
            let frequency = match request.reporting_frequency.parse::<ReportingFrequency>() {
                Ok(frequency) => frequency,
                Err(err) => {
                    collector.warning(&context, format!("{err}; defaulting to Hourly"));
                    ReportingFrequency::Hourly
                }
            };
            let window = self.meters[meter_idx].window_mut(frequency);
            if cumulative {
                window.report_cumulative = true;
            } else {
                window.report = true;
            }
        }
    }

    /// The single hot path per simulation tick: fan each variable's timestep
    /// delta out to every meter it feeds, derive decrement meters from their
    /// sources, and fold the fresh timestep totals into the hourly window.
    pub fn update_all(&mut self, variables: &VariableRegistry, clock: &SimulationClock) {
        let stamp = clock.timestamp_code();
        for meter in self.meters.iter_mut() {
            meter.ts_value = 0.0;
        }
        for array in &self.var_meter_arrays {
            let delta = variables.tick_value(array.source_var);
            for &meter_idx in &array.standard {
                self.meters[meter_idx].ts_value += delta;
            }
            for &meter_idx in &array.custom {
                match self.meters[meter_idx].kind {
                    MeterKind::Custom => self.meters[meter_idx].ts_value += delta,
                    MeterKind::CustomDecrement | MeterKind::CustomDifference => {
                        self.meters[meter_idx].ts_value -= delta
                    }
                    MeterKind::Normal => self.meters[meter_idx].ts_value += delta,
                }
            }
        }
        // decrement meters start from their source's fresh timestep total
        for idx in 0..self.meters.len() {
            if let (MeterKind::CustomDecrement | MeterKind::CustomDifference, Some(source)) =
                (self.meters[idx].kind, self.meters[idx].source_meter)
            {
                let source_total = self.meters[source].ts_value;
                self.meters[idx].ts_value += source_total;
            }
        }
        for meter in self.meters.iter_mut() {
            let ts = meter.ts_value;
            meter.ts.value = ts;
            meter.ts.min_max.observe(ts, stamp);
            meter.hr.fold(ts, stamp);
            meter.running_total += ts;
        }
    }

    /// Report timestep-cadence meter rows for the tick just updated.
    pub fn report_timestep<S: SqlSink>(
        &mut self,
        emission: &mut EmissionLayer<S>,
        clock: &SimulationClock,
    ) -> anyhow::Result<()> {
        for idx in 0..self.meters.len() {
            let (report, report_cumulative) =
                (self.meters[idx].ts.report, self.meters[idx].ts.report_cumulative);
            if report {
                emission.emit_time_stamp(EmitStream::Meter, ReportingFrequency::TimeStep, clock)?;
                emission.emit_value(
                    EmitStream::Meter,
                    self.meters[idx].ts.report_id,
                    ReportingFrequency::TimeStep,
                    self.meters[idx].ts_value,
                    VariableKind::Real,
                    None,
                )?;
            }
            if report_cumulative {
                emission.emit_time_stamp(EmitStream::Meter, ReportingFrequency::TimeStep, clock)?;
                emission.emit_cumulative_value(
                    self.meters[idx].ts.cumulative_report_id,
                    ReportingFrequency::TimeStep,
                    self.meters[idx].running_total,
                )?;
            }
        }
        Ok(())
    }

    /// Close a window: report it, fold its total into the next-coarser
    /// window with min/max refresh at the caller-supplied timestamp, and
    /// reset it. Closing the run period in the final simulated year also
    /// captures the final-year variant.
    pub fn close_window<S: SqlSink>(
        &mut self,
        window: ReportingFrequency,
        emission: &mut EmissionLayer<S>,
        clock: &SimulationClock,
    ) -> anyhow::Result<()> {
        let stamp = clock.timestamp_code();
        for idx in 0..self.meters.len() {
            let value = self.meters[idx].window(window).value;
            let report = self.meters[idx].window(window).report;
            let report_cumulative = self.meters[idx].window(window).report_cumulative;
            if report {
                emission.emit_time_stamp(EmitStream::Meter, window, clock)?;
                let meter = &self.meters[idx];
                emission.emit_value(
                    EmitStream::Meter,
                    meter.window(window).report_id,
                    window,
                    value,
                    VariableKind::Real,
                    Some(&meter.window(window).min_max),
                )?;
            }
            if report_cumulative {
                emission.emit_time_stamp(EmitStream::Meter, window, clock)?;
                let cumulative_id = self.meters[idx].window(window).cumulative_report_id;
                let running_total = self.meters[idx].running_total;
                emission.emit_cumulative_value(cumulative_id, window, running_total)?;
            }

            let meter = &mut self.meters[idx];
            match window {
                ReportingFrequency::Hourly => meter.dy.fold(value, stamp),
                ReportingFrequency::Daily => meter.mn.fold(value, stamp),
                ReportingFrequency::Monthly => {
                    meter.yr.fold(value, stamp);
                    meter.sm.fold(value, stamp);
                }
                ReportingFrequency::RunPeriod if clock.final_year() => {
                    meter.final_year_sm_value = meter.sm.value;
                    meter.final_year_sm_min_max = meter.sm.min_max;
                }
                _ => {}
            }
            if !matches!(
                window,
                ReportingFrequency::EachCall | ReportingFrequency::TimeStep
            ) {
                meter.window_mut(window).reset();
            }
        }
        Ok(())
    }

    /// Zero the coarse-window accumulators and min/max of every meter so the
    /// warm-up phase does not pollute reported totals; timestep values are
    /// untouched. Invoked exactly once, when warm-up convergence ends.
    pub fn reset_after_warmup(&mut self) {
        for meter in self.meters.iter_mut() {
            meter.hr.reset();
            meter.dy.reset();
            meter.mn.reset();
            meter.yr.reset();
            meter.sm.reset();
            meter.running_total = 0.0;
        }
    }

    /// Emit dictionary headers for every requested (meter, window)
    /// combination, before any values.
    pub fn write_dictionary<S: SqlSink>(
        &self,
        emission: &mut EmissionLayer<S>,
    ) -> anyhow::Result<()> {
        const WINDOWS: [ReportingFrequency; 6] = [
            ReportingFrequency::TimeStep,
            ReportingFrequency::Hourly,
            ReportingFrequency::Daily,
            ReportingFrequency::Monthly,
            ReportingFrequency::Yearly,
            ReportingFrequency::RunPeriod,
        ];
        for meter in &self.meters {
            for window in WINDOWS {
                let state = meter.window(window);
                if state.report {
                    emission.write_meter_dictionary_item(
                        state.report_id,
                        window,
                        &meter.name,
                        meter.units,
                        false,
                    )?;
                }
                if state.report_cumulative {
                    emission.write_meter_dictionary_item(
                        state.cumulative_report_id,
                        window,
                        &meter.name,
                        meter.units,
                        true,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// The meter-detail cross-reference: each variable's meters and each
    /// meter's contributing variables, rendered both ways.
    pub fn report_meter_details(
        &self,
        variables: &VariableRegistry,
        writer: &mut dyn Write,
    ) -> anyhow::Result<()> {
        for array in &self.var_meter_arrays {
            let Some(source) = variables.source(array.source_var) else {
                continue;
            };
            writeln!(
                writer,
                "Meters for {}:{} [{}]",
                source.key, source.name, source.units
            )?;
            for &meter_idx in array.standard.iter().chain(&array.custom) {
                let meter = &self.meters[meter_idx];
                writeln!(writer, "  OnMeter={} [{}]", meter.name, meter.units)?;
            }
        }
        for meter in &self.meters {
            writeln!(
                writer,
                "For Meter={} [{}], ResourceType={}, contents are:",
                meter.name, meter.units, meter.resource
            )?;
            for &variable_id in &meter.contributions {
                if let Some(source) = variables.source(variable_id) {
                    writeln!(writer, "  {}:{}", source.key, source.name)?;
                }
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reporting::sinks::InMemorySqlSink;
    use crate::core::reporting::variable::VariableHandle;
    use crate::core::schedule::{FsFileLoader, ScheduleRegistry};
    use crate::output::SinkOutput;
    use crate::simulation_time::DayType;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use serde_json::json;

    struct Rig {
        variables: VariableRegistry,
        schedules: ScheduleRegistry,
        meters: MeterEngine,
        ids: ReportIdGenerator,
        clock: SimulationClock,
    }

    fn rig_with(input: serde_json::Value) -> Rig {
        let input: Input = serde_json::from_value(input).unwrap();
        let schedules = ScheduleRegistry::compile(&input, &FsFileLoader, false).unwrap();
        let mut collector = ErrorCollector::new();
        let variables = VariableRegistry::from_input(&input, &mut collector);
        assert!(!collector.has_fatals());
        let mut clock = SimulationClock::new(4, 2017).unwrap();
        clock.start_day(1, DayType::Sunday).unwrap();
        Rig {
            variables,
            schedules,
            meters: MeterEngine::new(),
            ids: ReportIdGenerator::new(),
            clock,
        }
    }

    /// Two summed variables requested hourly, both metered as interior
    /// lights / equipment electricity.
    fn two_variable_rig() -> (Rig, VariableHandle, VariableHandle) {
        let mut rig = rig_with(json!({
            "Output:Variable": [
                {"VariableName": "Lights Electricity Energy", "ReportingFrequency": "Hourly"},
                {"VariableName": "Equipment Electricity Energy", "ReportingFrequency": "Hourly"}
            ]
        }));
        let spec = MeterSpec {
            resource: ResourceType::Electricity,
            end_use: EndUseCategory::InteriorLights,
            end_use_sub: None,
            group: Some(MeterGroup::Building),
            zone: Some("Zone One".to_string()),
        };
        let (h1, v1) = setup_summed(&mut rig, "Zone One", "Lights Electricity Energy");
        rig.meters
            .attach_standard_meters(&spec, v1, &mut rig.variables, &mut rig.ids)
            .unwrap();
        let spec2 = MeterSpec {
            end_use: EndUseCategory::InteriorEquipment,
            ..spec
        };
        let (h2, v2) = setup_summed(&mut rig, "Zone One", "Equipment Electricity Energy");
        rig.meters
            .attach_standard_meters(&spec2, v2, &mut rig.variables, &mut rig.ids)
            .unwrap();
        (rig, h1, h2)
    }

    fn setup_summed(rig: &mut Rig, key: &str, name: &str) -> (VariableHandle, usize) {
        let handle = rig
            .variables
            .setup_variable(
                key,
                name,
                Unit::J,
                StoreType::Summed,
                VariableKind::Real,
                &mut rig.schedules,
                &mut rig.ids,
            )
            .unwrap();
        assert!(handle.is_reported(), "test variable '{name}' must be requested");
        (handle, rig.variables.find_source(key, name).unwrap())
    }

    fn update(rig: &mut Rig, handle: VariableHandle, value: f64) {
        rig.variables
            .update(handle, value, &rig.schedules, &rig.clock)
            .unwrap();
    }

    fn emission() -> EmissionLayer<InMemorySqlSink> {
        EmissionLayer::new(&SinkOutput, InMemorySqlSink::default()).unwrap()
    }

    #[rstest]
    fn implied_standard_meters_are_created_lazily() {
        let (rig, _, _) = two_variable_rig();
        for name in [
            "Electricity:Facility",
            "Electricity:Building",
            "Electricity:Zone:Zone One",
            "InteriorLights:Electricity",
            "InteriorLights:Electricity:Zone:Zone One",
            "InteriorEquipment:Electricity",
        ] {
            assert!(
                rig.meters.meter_by_name(name).is_some(),
                "expected implied meter '{name}'"
            );
        }
    }

    /// Meter additivity: the facility meter's timestep value is the sum of
    /// its attached variables' deltas, and the hourly window accumulates
    /// every timestep total observed within the hour.
    #[rstest]
    fn meter_additivity_across_fanout_and_hour() {
        let (mut rig, v1, v2) = two_variable_rig();
        let facility = rig.meters.meter_index("Electricity:Facility").unwrap();
        let mut emission = emission();
        for _ in 0..4 {
            update(&mut rig, v1, 5.0);
            update(&mut rig, v2, 7.0);
            rig.meters.update_all(&rig.variables, &rig.clock);
            assert_eq!(rig.meters.meter(facility).unwrap().ts_value(), 12.0);
            if rig.clock.is_end_of_hour() {
                break;
            }
            rig.clock.advance();
        }
        assert_eq!(
            rig.meters
                .meter(facility)
                .unwrap()
                .window(ReportingFrequency::Hourly)
                .value,
            48.0
        );
        rig.meters
            .close_window(ReportingFrequency::Hourly, &mut emission, &rig.clock)
            .unwrap();
        let meter = rig.meters.meter(facility).unwrap();
        assert_eq!(meter.window(ReportingFrequency::Hourly).value, 0.0);
        assert_eq!(meter.window(ReportingFrequency::Daily).value, 48.0);
    }

    /// Decrement consistency: D.TS + delta(V) == S.TS for the same tick.
    #[rstest]
    fn decrement_meter_subtracts_from_its_source() {
        let (mut rig, v1, v2) = two_variable_rig();
        let mut collector = ErrorCollector::new();
        let input: Input = serde_json::from_value(json!({
            "Meter:CustomDecrement": [{
                "Name": "Non-Lighting Electricity",
                "FuelType": "Electricity",
                "SourceMeterName": "Electricity:Facility",
                "Entries": [
                    {"OutputVariableOrMeterName": "Lights Electricity Energy"}
                ]
            }]
        }))
        .unwrap();
        rig.meters
            .setup_custom_meters(&input, &mut rig.variables, &mut rig.ids, &mut collector);
        assert!(!collector.has_fatals(), "{:?}", collector);

        update(&mut rig, v1, 5.0);
        update(&mut rig, v2, 7.0);
        rig.meters.update_all(&rig.variables, &rig.clock);
        let source = rig.meters.meter_by_name("Electricity:Facility").unwrap();
        let decrement = rig.meters.meter_by_name("Non-Lighting Electricity").unwrap();
        assert_eq!(decrement.ts_value() + 5.0, source.ts_value());
        assert_eq!(decrement.ts_value(), 7.0);
    }

    /// Duplicate-name rejection is the documented fatal condition.
    #[rstest]
    fn duplicate_meter_name_is_fatal() {
        let mut meters = MeterEngine::new();
        let mut ids = ReportIdGenerator::new();
        meters
            .add_meter(
                "Electricity:Facility",
                Unit::J,
                MeterKind::Normal,
                ResourceType::Electricity,
                None,
                None,
                None,
                None,
                &mut ids,
            )
            .unwrap();
        let err = meters
            .add_meter(
                "Electricity:Facility",
                Unit::J,
                MeterKind::Normal,
                ResourceType::Electricity,
                None,
                None,
                None,
                None,
                &mut ids,
            )
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Requested to Add Meter which was already present"));
    }

    /// Reset-after-warmup zeroes the coarse windows back to their sentinels
    /// while the timestep value from the preceding tick is untouched.
    #[rstest]
    fn reset_after_warmup_restores_sentinels() {
        let (mut rig, v1, v2) = two_variable_rig();
        let facility = rig.meters.meter_index("Electricity:Facility").unwrap();
        update(&mut rig, v1, 5.0);
        update(&mut rig, v2, 7.0);
        rig.meters.update_all(&rig.variables, &rig.clock);
        rig.meters.reset_after_warmup();
        let meter = rig.meters.meter(facility).unwrap();
        assert_eq!(meter.ts_value(), 12.0, "timestep value must survive");
        for window in [
            ReportingFrequency::Hourly,
            ReportingFrequency::Daily,
            ReportingFrequency::Monthly,
            ReportingFrequency::Yearly,
            ReportingFrequency::RunPeriod,
        ] {
            let state = meter.window(window);
            assert_eq!(state.value, 0.0);
            assert_eq!(state.min_max.min, crate::core::reporting::MIN_SENTINEL);
            assert_eq!(state.min_max.max, crate::core::reporting::MAX_SENTINEL);
        }
    }

    #[rstest]
    fn illegal_vocabulary_is_rejected() {
        let mut rig = rig_with(json!({
            "Output:Variable": [
                {"VariableName": "Some Energy", "ReportingFrequency": "Hourly"}
            ]
        }));
        let (_, v) = setup_summed(&mut rig, "K", "Some Energy");
        let spec = MeterSpec {
            resource: ResourceType::Other("Plutonium".to_string()),
            end_use: EndUseCategory::Heating,
            end_use_sub: None,
            group: None,
            zone: None,
        };
        let err = rig
            .meters
            .attach_standard_meters(&spec, v, &mut rig.variables, &mut rig.ids)
            .unwrap_err();
        assert!(err.to_string().contains("Illegal ResourceType Entered=Plutonium"));
    }

    #[rstest]
    fn averaged_variables_cannot_be_metered() {
        let mut rig = rig_with(json!({
            "Output:Variable": [
                {"VariableName": "Zone Temperature", "ReportingFrequency": "Hourly"}
            ]
        }));
        let handle = rig
            .variables
            .setup_variable(
                "Zone One",
                "Zone Temperature",
                Unit::C,
                StoreType::Averaged,
                VariableKind::Real,
                &mut rig.schedules,
                &mut rig.ids,
            )
            .unwrap();
        assert!(handle.is_reported());
        let v = rig.variables.find_source("Zone One", "Zone Temperature").unwrap();
        let spec = MeterSpec {
            resource: ResourceType::Electricity,
            end_use: EndUseCategory::Heating,
            end_use_sub: None,
            group: None,
            zone: None,
        };
        assert!(rig
            .meters
            .attach_standard_meters(&spec, v, &mut rig.variables, &mut rig.ids)
            .is_err());
    }

    #[rstest]
    fn custom_meter_may_not_reference_custom_meter() {
        let (mut rig, _, _) = two_variable_rig();
        let mut collector = ErrorCollector::new();
        let input: Input = serde_json::from_value(json!({
            "Meter:Custom": [
                {
                    "Name": "First Custom",
                    "FuelType": "Electricity",
                    "Entries": [
                        {"OutputVariableOrMeterName": "Lights Electricity Energy"}
                    ]
                },
                {
                    "Name": "Second Custom",
                    "FuelType": "Electricity",
                    "Entries": [
                        {"OutputVariableOrMeterName": "First Custom"}
                    ]
                }
            ]
        }))
        .unwrap();
        rig.meters
            .setup_custom_meters(&input, &mut rig.variables, &mut rig.ids, &mut collector);
        assert!(collector.has_fatals());
        let rendered = collector.finish().unwrap_err().to_string();
        assert!(rendered.contains("Referencing custom meter 'First Custom' is not allowed"));
    }

    #[rstest]
    fn decrement_variable_must_contribute_to_source_meter() {
        let (mut rig, _, _) = two_variable_rig();
        let mut collector = ErrorCollector::new();
        let input: Input = serde_json::from_value(json!({
            "Meter:CustomDecrement": [{
                "Name": "Bad Decrement",
                "FuelType": "Electricity",
                "SourceMeterName": "InteriorLights:Electricity",
                "Entries": [
                    {"OutputVariableOrMeterName": "Equipment Electricity Energy"}
                ]
            }]
        }))
        .unwrap();
        rig.meters
            .setup_custom_meters(&input, &mut rig.variables, &mut rig.ids, &mut collector);
        let rendered = collector.finish().unwrap_err().to_string();
        assert!(rendered.contains("not found on source meter"));
    }

    #[rstest]
    fn custom_meter_with_no_attachments_warns_and_reports_zero() {
        let (mut rig, v1, v2) = two_variable_rig();
        let mut collector = ErrorCollector::new();
        let input: Input = serde_json::from_value(json!({
            "Meter:Custom": [{
                "Name": "Empty Custom",
                "FuelType": "Electricity",
                "Entries": [
                    {"OutputVariableOrMeterName": "No Such Variable"}
                ]
            }]
        }))
        .unwrap();
        rig.meters
            .setup_custom_meters(&input, &mut rig.variables, &mut rig.ids, &mut collector);
        assert!(!collector.has_fatals());
        assert!(collector.warning_count() >= 1);
        update(&mut rig, v1, 5.0);
        update(&mut rig, v2, 7.0);
        rig.meters.update_all(&rig.variables, &rig.clock);
        assert_eq!(rig.meters.meter_by_name("Empty Custom").unwrap().ts_value(), 0.0);
    }

    #[rstest]
    fn meter_requests_flag_windows_and_emit_rows() {
        let (mut rig, v1, v2) = two_variable_rig();
        let mut collector = ErrorCollector::new();
        let input: Input = serde_json::from_value(json!({
            "Output:Meter": [
                {"KeyName": "Electricity:Facility", "ReportingFrequency": "Hourly"}
            ],
            "Output:Meter:Cumulative": [
                {"KeyName": "Electricity:Facility", "ReportingFrequency": "Hourly"}
            ]
        }))
        .unwrap();
        rig.meters.apply_meter_requests(&input, &mut collector);
        assert!(!collector.has_fatals());

        let mut emission = emission();
        rig.meters.write_dictionary(&mut emission).unwrap();
        assert_eq!(emission.sql().dictionary.len(), 2);
        assert!(emission.sql().dictionary[1].name.starts_with("Cumulative "));

        for _ in 0..4 {
            update(&mut rig, v1, 5.0);
            update(&mut rig, v2, 7.0);
            rig.meters.update_all(&rig.variables, &rig.clock);
            if rig.clock.is_end_of_hour() {
                rig.meters
                    .close_window(ReportingFrequency::Hourly, &mut emission, &rig.clock)
                    .unwrap();
            }
            rig.clock.advance();
        }
        let facility = rig.meters.meter_by_name("Electricity:Facility").unwrap();
        let hourly_id = facility.window(ReportingFrequency::Hourly).report_id;
        let cumulative_id = facility.window(ReportingFrequency::Hourly).cumulative_report_id;
        assert_eq!(
            emission.results().values(ReportingFrequency::Hourly, hourly_id),
            Some([48.0].as_slice())
        );
        assert_eq!(
            emission
                .results()
                .values(ReportingFrequency::Hourly, cumulative_id),
            Some([48.0].as_slice())
        );
    }

    #[rstest]
    fn final_year_run_period_totals_are_captured() {
        let (mut rig, v1, v2) = two_variable_rig();
        let facility = rig.meters.meter_index("Electricity:Facility").unwrap();
        let mut emission = emission();
        update(&mut rig, v1, 5.0);
        update(&mut rig, v2, 7.0);
        rig.meters.update_all(&rig.variables, &rig.clock);
        rig.meters
            .close_window(ReportingFrequency::Hourly, &mut emission, &rig.clock)
            .unwrap();
        rig.meters
            .close_window(ReportingFrequency::Daily, &mut emission, &rig.clock)
            .unwrap();
        rig.meters
            .close_window(ReportingFrequency::Monthly, &mut emission, &rig.clock)
            .unwrap();
        rig.clock.set_final_year(true);
        rig.meters
            .close_window(ReportingFrequency::RunPeriod, &mut emission, &rig.clock)
            .unwrap();
        assert_eq!(rig.meters.meter(facility).unwrap().final_year_total(), 12.0);
    }

    #[rstest]
    fn meter_details_render_both_directions() {
        let (rig, _, _) = two_variable_rig();
        let mut buffer = vec![];
        rig.meters
            .report_meter_details(&rig.variables, &mut buffer)
            .unwrap();
        let report = String::from_utf8(buffer).unwrap();
        assert!(report.contains("Meters for Zone One:Lights Electricity Energy [J]"));
        assert!(report.contains("OnMeter=Electricity:Facility [J]"));
        assert!(report.contains("For Meter=InteriorLights:Electricity [J]"));
        assert!(report.contains("  Zone One:Lights Electricity Energy"));
    }
}
